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

//! The table of bundles currently resident in memory.

use parcel_core::{BundleError, BundleKey, BundleLease, BundleName, BundleResult, LeaseId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// When a bundle whose last handle was released leaves memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnloadPolicy {
    /// Stay resident until the next [`RuntimeRegistry::sweep`].
    #[default]
    Deferred,
    /// Leave memory inside the `release` call that dropped the last share.
    Immediate,
}

/// Whether a resident bundle is still referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyState {
    /// At least one lease is outstanding.
    Loaded,
    /// No lease is outstanding; the entry waits for the next sweep and can
    /// only be revived by a fresh load.
    Unreferenced,
}

/// What a successful release did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other leases remain.
    Retained {
        /// The remaining reference count.
        refcount: usize,
    },
    /// The last lease was released; the entry waits for a sweep.
    Unreferenced,
    /// The last lease was released and the entry was dropped.
    Unloaded,
}

/// A read-only view of one resident bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedBundleInfo {
    /// The bundle and the hash it was loaded at.
    pub key: BundleKey,
    /// Outstanding leases.
    pub refcount: usize,
    /// Residency state.
    pub state: ResidencyState,
    /// Payload size in bytes.
    pub size: usize,
    /// How long ago the payload entered memory, in milliseconds.
    pub age_ms: u64,
}

struct LoadedBundle {
    payload: Arc<[u8]>,
    leases: HashSet<LeaseId>,
    loaded_at: Instant,
}

impl LoadedBundle {
    fn refcount(&self) -> usize {
        self.leases.len()
    }
}

#[derive(Default)]
struct RegistryInner {
    bundles: HashMap<BundleKey, LoadedBundle>,
    leases: HashMap<LeaseId, BundleKey>,
}

/// The single source of truth for "is this bundle usable right now".
///
/// Each entry's reference count is the number of outstanding leases on it, so
/// it can never go negative. A bundle whose count reached zero is never handed
/// out again by [`try_acquire`](Self::try_acquire); only a completed load can
/// revive it through [`acquire`](Self::acquire).
pub struct RuntimeRegistry {
    policy: UnloadPolicy,
    next_lease: AtomicU64,
    inner: Mutex<RegistryInner>,
}

impl RuntimeRegistry {
    /// Creates an empty registry.
    pub fn new(policy: UnloadPolicy) -> Self {
        Self {
            policy,
            next_lease: AtomicU64::new(1),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// The unload policy this registry applies on release.
    pub fn policy(&self) -> UnloadPolicy {
        self.policy
    }

    fn issue_lease(&self) -> LeaseId {
        LeaseId::new(self.next_lease.fetch_add(1, Ordering::Relaxed))
    }

    /// Takes another share on a bundle that is already loaded and referenced.
    ///
    /// Returns `None` if the bundle is absent or unreferenced; the caller must
    /// then run a load operation.
    pub fn try_acquire(&self, key: &BundleKey) -> Option<BundleLease> {
        let mut inner = self.inner.lock();
        let id = self.issue_lease();
        let payload = {
            let bundle = inner.bundles.get_mut(key)?;
            if bundle.refcount() == 0 {
                return None;
            }
            bundle.leases.insert(id);
            bundle.payload.clone()
        };
        inner.leases.insert(id, key.clone());
        log::trace!("Registry: {} acquired {}", key, id);
        Some(BundleLease::new(id, key.clone(), payload))
    }

    /// Takes a share on a bundle whose load just completed.
    ///
    /// Creates the entry at refcount 1 if it is absent or unreferenced,
    /// otherwise increments the existing entry and shares its payload.
    pub fn acquire(&self, key: &BundleKey, payload: Arc<[u8]>) -> BundleLease {
        let mut inner = self.inner.lock();
        let id = self.issue_lease();
        let shared = {
            let bundle = inner
                .bundles
                .entry(key.clone())
                .or_insert_with(|| LoadedBundle {
                    payload: payload.clone(),
                    leases: HashSet::new(),
                    loaded_at: Instant::now(),
                });
            if bundle.refcount() == 0 {
                bundle.payload = payload;
                bundle.loaded_at = Instant::now();
            }
            bundle.leases.insert(id);
            log::debug!("Registry: {} refcount -> {}", key, bundle.refcount());
            bundle.payload.clone()
        };
        inner.leases.insert(id, key.clone());
        BundleLease::new(id, key.clone(), shared)
    }

    /// Gives back one share.
    ///
    /// # Errors
    ///
    /// [`BundleError::DoubleRelease`] if the lease was already released (or was
    /// never issued by this registry). Nothing is modified in that case.
    pub fn release(&self, lease: &BundleLease) -> BundleResult<ReleaseOutcome> {
        let mut inner = self.inner.lock();
        let double_release = || BundleError::DoubleRelease {
            bundle: lease.name().clone(),
            lease: lease.id(),
        };

        let key = inner.leases.remove(&lease.id()).ok_or_else(double_release)?;
        let removed = inner
            .bundles
            .get_mut(&key)
            .map(|bundle| (bundle.leases.remove(&lease.id()), bundle.refcount()));
        let remaining = match removed {
            Some((true, remaining)) => remaining,
            _ => {
                log::error!("Registry: lease {} had no matching entry for {}", lease.id(), key);
                return Err(double_release());
            }
        };

        if remaining > 0 {
            log::debug!("Registry: {} refcount -> {}", key, remaining);
            return Ok(ReleaseOutcome::Retained {
                refcount: remaining,
            });
        }

        match self.policy {
            UnloadPolicy::Immediate => {
                inner.bundles.remove(&key);
                log::debug!("Registry: unloaded {}", key);
                Ok(ReleaseOutcome::Unloaded)
            }
            UnloadPolicy::Deferred => {
                log::debug!("Registry: {} is unreferenced", key);
                Ok(ReleaseOutcome::Unreferenced)
            }
        }
    }

    /// Drops every unreferenced entry and returns the keys that left memory.
    pub fn sweep(&self) -> Vec<BundleKey> {
        let mut inner = self.inner.lock();
        let mut evicted: Vec<BundleKey> = inner
            .bundles
            .iter()
            .filter(|(_, bundle)| bundle.refcount() == 0)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &evicted {
            inner.bundles.remove(key);
        }
        evicted.sort();
        if !evicted.is_empty() {
            log::debug!("Registry: swept {} unreferenced bundle(s)", evicted.len());
        }
        evicted
    }

    /// Returns `true` if any version of `name` has an outstanding lease.
    pub fn is_in_use(&self, name: &BundleName) -> bool {
        self.inner
            .lock()
            .bundles
            .iter()
            .any(|(key, bundle)| &key.name == name && bundle.refcount() > 0)
    }

    /// The reference count of one entry (0 if absent).
    pub fn refcount(&self, key: &BundleKey) -> usize {
        self.inner
            .lock()
            .bundles
            .get(key)
            .map_or(0, LoadedBundle::refcount)
    }

    /// The number of resident entries, referenced or not.
    pub fn loaded_count(&self) -> usize {
        self.inner.lock().bundles.len()
    }

    /// The number of entries with at least one outstanding lease.
    pub fn in_use_count(&self) -> usize {
        self.inner
            .lock()
            .bundles
            .values()
            .filter(|bundle| bundle.refcount() > 0)
            .count()
    }

    /// A snapshot of every resident entry, sorted by key.
    pub fn snapshot(&self) -> Vec<LoadedBundleInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<LoadedBundleInfo> = inner
            .bundles
            .iter()
            .map(|(key, bundle)| LoadedBundleInfo {
                key: key.clone(),
                refcount: bundle.refcount(),
                state: if bundle.refcount() > 0 {
                    ResidencyState::Loaded
                } else {
                    ResidencyState::Unreferenced
                },
                size: bundle.payload.len(),
                age_ms: bundle.loaded_at.elapsed().as_millis() as u64,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new(UnloadPolicy::default())
    }
}
