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

//! The per-bundle load state machine.

use parcel_core::{BundleError, BundleKey, BundleResult, ContentVersion};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// The result a load operation delivers to every waiter.
pub type LoadOutcome = BundleResult<Arc<[u8]>>;

/// Where a [`LoadOperation`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    /// Waiting for a loader slot.
    Queued,
    /// Looking for a valid entry in the on-disk cache.
    ConsultingCache,
    /// Fetching from the source. `attempt` is 1-based.
    Fetching {
        /// The current attempt.
        attempt: u32,
    },
    /// Checking the fetched bytes against the manifest hash.
    Verifying,
    /// Terminal success.
    Ready,
    /// Terminal failure.
    Failed,
}

impl LoadState {
    /// Returns `true` for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Ready | LoadState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Fetching -> Ready` is listed because unverified sources skip
    /// `Verifying`; [`LoadOperation`] only allows it for those.
    pub fn can_transition_to(&self, next: &LoadState) -> bool {
        use LoadState::*;
        match (self, next) {
            (Ready | Failed, _) => false,
            (_, Failed) => true,
            (Queued, ConsultingCache) => true,
            (ConsultingCache, Ready | Fetching { attempt: 1 }) => true,
            (Fetching { attempt }, Fetching { attempt: to }) => *to == attempt + 1,
            (Fetching { .. }, Verifying | Ready) => true,
            (Verifying, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Queued => f.write_str("queued"),
            LoadState::ConsultingCache => f.write_str("consulting cache"),
            LoadState::Fetching { attempt } => write!(f, "fetching (attempt {attempt})"),
            LoadState::Verifying => f.write_str("verifying"),
            LoadState::Ready => f.write_str("ready"),
            LoadState::Failed => f.write_str("failed"),
        }
    }
}

/// A point-in-time view of an operation, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    /// The payload being loaded.
    pub key: BundleKey,
    /// The content version the load belongs to.
    pub version: ContentVersion,
    /// The current state.
    pub state: LoadState,
    /// How many requests are waiting on the operation.
    pub waiters: usize,
    /// Time since the operation was created.
    pub elapsed_ms: u64,
}

/// Drives a single bundle payload from request to `Ready` or `Failed`.
///
/// Every caller that joins the operation awaits the same completion channel
/// and receives a clone of the same outcome, exactly once.
pub struct LoadOperation {
    key: BundleKey,
    version: ContentVersion,
    verifies: bool,
    state: Mutex<Vec<LoadState>>,
    waiters: AtomicUsize,
    created: Instant,
    completion: watch::Sender<Option<LoadOutcome>>,
}

impl LoadOperation {
    /// Creates a queued operation. `verifies` is `false` for sources whose
    /// loads skip the cache and hash verification.
    pub fn new(key: BundleKey, version: ContentVersion, verifies: bool) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            key,
            version,
            verifies,
            state: Mutex::new(vec![LoadState::Queued]),
            waiters: AtomicUsize::new(0),
            created: Instant::now(),
            completion,
        }
    }

    /// The payload this operation loads.
    pub fn key(&self) -> &BundleKey {
        &self.key
    }

    /// The content version the load belongs to.
    pub fn version(&self) -> &ContentVersion {
        &self.version
    }

    /// Whether fetched bytes go through `Verifying`.
    pub fn verifies(&self) -> bool {
        self.verifies
    }

    /// The current state.
    pub fn state(&self) -> LoadState {
        let states = self.state.lock();
        states.last().copied().unwrap_or(LoadState::Queued)
    }

    /// Every state visited so far, oldest first.
    pub fn transitions(&self) -> Vec<LoadState> {
        self.state.lock().clone()
    }

    /// Moves to `next`. An illegal transition is refused and logged.
    pub fn transition(&self, next: LoadState) -> bool {
        let mut states = self.state.lock();
        let current = states.last().copied().unwrap_or(LoadState::Queued);
        let skips_verification =
            matches!((current, next), (LoadState::Fetching { .. }, LoadState::Ready));
        if !current.can_transition_to(&next) || (skips_verification && self.verifies) {
            log::error!(
                "LoadOperation {}: illegal transition {} -> {}",
                self.key,
                current,
                next
            );
            return false;
        }
        log::trace!("LoadOperation {}: {} -> {}", self.key, current, next);
        states.push(next);
        true
    }

    /// Registers one more waiter. The count drops again when the returned
    /// [`Waiter`] is dropped.
    pub(crate) fn join(self: &Arc<Self>) -> Waiter {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        Waiter {
            operation: Arc::clone(self),
        }
    }

    /// How many requests are currently waiting on the operation.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Publishes the outcome to every current and future waiter. Only the
    /// first call has an effect.
    pub(crate) fn complete(&self, outcome: LoadOutcome) -> bool {
        self.completion.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    /// Returns `true` once an outcome has been published.
    pub fn is_complete(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Waits for the outcome.
    ///
    /// Dropping the returned future only stops this caller from waiting; the
    /// operation itself keeps running.
    pub async fn wait(&self) -> LoadOutcome {
        let mut receiver = self.completion.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(BundleError::ShutDown)),
            // The sender lives as long as `self`, so this is unreachable
            // while the caller holds a reference.
            Err(_) => Err(BundleError::ShutDown),
        };
        outcome
    }

    /// A point-in-time view for diagnostics.
    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            key: self.key.clone(),
            version: self.version.clone(),
            state: self.state(),
            waiters: self.waiters(),
            elapsed_ms: self.created.elapsed().as_millis() as u64,
        }
    }
}

/// One request's place in a [`LoadOperation`].
///
/// The request counts as a waiter for as long as this value lives, whether it
/// ends by receiving the outcome or by being abandoned.
#[derive(Debug)]
pub struct Waiter {
    operation: Arc<LoadOperation>,
}

impl Waiter {
    /// The joined operation.
    pub fn operation(&self) -> &Arc<LoadOperation> {
        &self.operation
    }

    /// Waits for the operation's outcome.
    pub async fn wait(&self) -> LoadOutcome {
        self.operation.wait().await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.operation.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for LoadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOperation")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("waiters", &self.waiters())
            .finish()
    }
}
