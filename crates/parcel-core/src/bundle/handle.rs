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

use super::{BundleKey, BundleName, ContentHash};
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, sync::Arc};

/// Identifies one reference-count share handed out by the runtime registry.
///
/// Every lease id is issued exactly once; releasing the same id twice is a
/// programming error that the registry reports instead of ignoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(u64);

impl LeaseId {
    /// Wraps a raw lease number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw lease number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One reference-count share on a single loaded bundle.
///
/// Cloning a lease is cheap (the payload is shared through an `Arc`) and does
/// not take an extra share: clones carry the same [`LeaseId`].
#[derive(Clone)]
pub struct BundleLease {
    id: LeaseId,
    key: BundleKey,
    payload: Arc<[u8]>,
}

impl BundleLease {
    /// Creates a lease. Only the runtime registry should call this.
    pub fn new(id: LeaseId, key: BundleKey, payload: Arc<[u8]>) -> Self {
        Self { id, key, payload }
    }

    /// The share identifier.
    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// The bundle this lease refers to.
    pub fn key(&self) -> &BundleKey {
        &self.key
    }

    /// The bundle name.
    pub fn name(&self) -> &BundleName {
        &self.key.name
    }

    /// The verified content hash.
    pub fn hash(&self) -> &ContentHash {
        &self.key.hash
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Arc<[u8]> {
        &self.payload
    }
}

impl fmt::Debug for BundleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleLease")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// A handle to a requested bundle together with its whole dependency closure.
///
/// The handle owns one lease on the requested bundle and one lease on every
/// bundle it depends on, which keeps all of them resident until the handle is
/// passed back to the agent's `release_bundle`. Dereferencing yields the
/// payload of the requested bundle.
#[derive(Debug, Clone)]
pub struct BundleHandle {
    root: BundleLease,
    dependencies: Vec<BundleLease>,
}

impl BundleHandle {
    /// Creates a handle from the root lease and the leases of its dependencies
    /// (in load order).
    pub fn new(root: BundleLease, dependencies: Vec<BundleLease>) -> Self {
        Self { root, dependencies }
    }

    /// The lease on the requested bundle.
    pub fn lease(&self) -> &BundleLease {
        &self.root
    }

    /// The requested bundle's name.
    pub fn name(&self) -> &BundleName {
        self.root.name()
    }

    /// The requested bundle's verified hash.
    pub fn hash(&self) -> &ContentHash {
        self.root.hash()
    }

    /// The leases held on dependencies, in load order.
    pub fn dependencies(&self) -> &[BundleLease] {
        &self.dependencies
    }

    /// Every bundle name this handle keeps resident, dependencies first.
    pub fn load_order(&self) -> Vec<BundleName> {
        self.dependencies
            .iter()
            .chain(std::iter::once(&self.root))
            .map(|lease| lease.name().clone())
            .collect()
    }
}

impl Deref for BundleHandle {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.root.payload
    }
}
