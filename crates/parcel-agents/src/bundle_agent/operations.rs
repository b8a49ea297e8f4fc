// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tracks every in-flight load operation.

use super::operation::{LoadOperation, OperationSnapshot, Waiter};
use parcel_core::BundleKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The table of non-terminal [`LoadOperation`]s, keyed by payload.
///
/// Looking an operation up and inserting a new one happen under the same lock,
/// which is what makes loading single-flight: two requests for the same
/// payload can never both create an operation.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: Mutex<HashMap<BundleKey, Arc<LoadOperation>>>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the operation for `key`, creating it with `create` if there is
    /// none. Returns the caller's [`Waiter`] and `true` if the operation was
    /// just created (the caller is then responsible for driving it).
    pub fn join_or_insert(
        &self,
        key: &BundleKey,
        create: impl FnOnce() -> LoadOperation,
    ) -> (Waiter, bool) {
        let mut operations = self.operations.lock();
        let mut created = false;
        let operation = operations
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(create())
            })
            .clone();
        let waiter = operation.join();
        if !created {
            log::debug!(
                "Joined in-flight load of {} ({} waiters)",
                key,
                operation.waiters()
            );
        }
        (waiter, created)
    }

    /// Removes `operation` if it is still the registered one for its key.
    pub fn remove(&self, operation: &Arc<LoadOperation>) -> bool {
        let mut operations = self.operations.lock();
        match operations.get(operation.key()) {
            Some(current) if Arc::ptr_eq(current, operation) => {
                operations.remove(operation.key());
                true
            }
            _ => false,
        }
    }

    /// The operation currently loading `key`.
    pub fn get(&self, key: &BundleKey) -> Option<Arc<LoadOperation>> {
        self.operations.lock().get(key).cloned()
    }

    /// Every in-flight operation.
    pub fn operations(&self) -> Vec<Arc<LoadOperation>> {
        self.operations.lock().values().cloned().collect()
    }

    /// Snapshots of every in-flight operation, sorted by key.
    pub fn snapshot(&self) -> Vec<OperationSnapshot> {
        let mut snapshots: Vec<_> = self
            .operations
            .lock()
            .values()
            .map(|op| op.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// The number of in-flight operations.
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    /// Returns `true` if nothing is loading.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
