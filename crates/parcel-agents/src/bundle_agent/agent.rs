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

//! The BundleAgent is responsible for bundle requests, releases and patch
//! switching.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use parcel_core::{
    resolver, BundleError, BundleHandle, BundleKey, BundleLease, BundleName, BundleResult,
    BundleSource, ContentVersion, Manifest, PatchHistory, PatchRecord, SourceMode,
};
use parcel_data::{ErrorLog, ReleaseOutcome, RuntimeRegistry};
use parcel_io::{BundleCache, ManifestStore, PatchStore};
use parcel_telemetry::MetricsRegistry;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use super::config::LoaderConfig;
use super::diagnostics::Diagnostics;
use super::events::BundleEvent;
use super::loader::{self, LoaderMetrics};
use super::operation::LoadOperation;
use super::operations::OperationRegistry;

/// State shared between the agent and the tasks driving its operations.
pub(crate) struct AgentShared {
    pub(crate) config: LoaderConfig,
    pub(crate) source: Arc<dyn BundleSource>,
    pub(crate) cache: BundleCache,
    pub(crate) registry: RuntimeRegistry,
    pub(crate) operations: OperationRegistry,
    pub(crate) error_log: ErrorLog,
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) metrics: LoaderMetrics,
    manifests: ManifestStore,
    patch_store: PatchStore,
    history: Mutex<PatchHistory>,
    active: RwLock<Option<Arc<Manifest>>>,
    events: RwLock<Option<Sender<BundleEvent>>>,
    shutting_down: AtomicBool,
    // Serializes deploys so history appends and activation stay in step.
    patch_lock: tokio::sync::Mutex<()>,
}

impl AgentShared {
    pub(crate) fn emit(&self, event: BundleEvent) {
        if let Some(sender) = self.events.read().as_ref() {
            let _ = sender.send(event);
        }
    }
}

/// The single entry point to the bundle lifecycle.
///
/// Cloning the agent is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct BundleAgent {
    shared: Arc<AgentShared>,
}

/// Leases taken for one request. Dropping the guard before
/// [`into_leases`](Self::into_leases) releases all of them, so a request that
/// fails, or whose caller stops waiting, leaves every refcount as it found it.
struct PendingLeases<'a> {
    registry: &'a RuntimeRegistry,
    slots: Vec<Option<BundleLease>>,
}

impl<'a> PendingLeases<'a> {
    fn new(registry: &'a RuntimeRegistry, len: usize) -> Self {
        Self {
            registry,
            slots: vec![None; len],
        }
    }

    fn fill(&mut self, index: usize, lease: BundleLease) {
        self.slots[index] = Some(lease);
    }

    fn into_leases(mut self) -> Vec<BundleLease> {
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }
}

impl Drop for PendingLeases<'_> {
    fn drop(&mut self) {
        for lease in self.slots.drain(..).flatten() {
            if let Err(err) = self.registry.release(&lease) {
                log::error!("Rolling back lease on {} failed: {}", lease.key(), err);
            }
        }
    }
}

impl BundleAgent {
    /// Creates a new `BundleAgent`.
    ///
    /// The patch history is read from `patch_store`; no version is active
    /// until [`start`](Self::start) or [`deploy_patch`](Self::deploy_patch)
    /// runs.
    pub fn new(
        config: LoaderConfig,
        source: Arc<dyn BundleSource>,
        cache: BundleCache,
        patch_store: PatchStore,
        metrics_registry: &MetricsRegistry,
    ) -> Result<Self> {
        let history = patch_store
            .load()
            .with_context(|| format!("Failed to read patch history from {}", patch_store.path().display()))?;
        let metrics =
            LoaderMetrics::new(metrics_registry).context("Failed to register loader metrics")?;
        metrics.cache_occupied.set(cache.space_occupied() as f64);

        log::info!(
            "BundleAgent: {} source, {} concurrent load(s), {} patch record(s)",
            source.mode(),
            config.max_concurrent_loads,
            history.len()
        );

        Ok(Self {
            shared: Arc::new(AgentShared {
                slots: Arc::new(Semaphore::new(config.max_concurrent_loads.max(1))),
                registry: RuntimeRegistry::new(config.unload_policy),
                error_log: ErrorLog::new(config.error_log_capacity),
                operations: OperationRegistry::new(),
                manifests: ManifestStore::new(source.clone()),
                history: Mutex::new(history),
                active: RwLock::new(None),
                events: RwLock::new(None),
                shutting_down: AtomicBool::new(false),
                patch_lock: tokio::sync::Mutex::new(()),
                config,
                source,
                cache,
                patch_store,
                metrics,
            }),
        })
    }

    /// Attaches a channel that receives a [`BundleEvent`] for every load.
    pub fn with_event_sender(self, sender: Sender<BundleEvent>) -> Self {
        *self.shared.events.write() = Some(sender);
        self
    }

    /// Activates the content version to run with.
    ///
    /// The newest history record wins. With an empty history, `initial` is
    /// deployed (and recorded) if given. Returns the active version.
    pub async fn start(&self, initial: Option<ContentVersion>) -> BundleResult<Option<ContentVersion>> {
        let current = self.shared.history.lock().current().map(|r| r.version.clone());
        match (current, initial) {
            (Some(version), _) => {
                let manifest = self.shared.manifests.load(&version).await?;
                *self.shared.active.write() = Some(manifest);
                log::info!("Resumed content version {}", version);
                Ok(Some(version))
            }
            (None, Some(version)) => {
                self.deploy_patch(version.clone(), "initial deployment").await?;
                Ok(Some(version))
            }
            (None, None) => {
                log::warn!("No content version to activate; requests will fail until a deploy");
                Ok(None)
            }
        }
    }

    /// Loads `name` and its whole dependency closure.
    ///
    /// Dependencies are loaded before the bundles that need them and every
    /// bundle of the closure is `Ready` when the handle is returned. Bundles
    /// already in flight are joined rather than fetched again. If any bundle
    /// fails, the request fails with that bundle's error and no lease taken
    /// for it survives; bundles that did load stay cached for later requests.
    pub async fn request_bundle(&self, name: impl Into<BundleName>) -> BundleResult<BundleHandle> {
        let name = name.into();
        self.ensure_running()?;

        let manifest = self.active_manifest()?;
        let order = resolver::resolve(&name, &manifest).inspect_err(|err| {
            self.shared.error_log.append(name.clone(), err.to_string());
            log::error!("Cannot resolve {}: {}", name, err);
        })?;
        log::debug!("Request {}: load order {:?}", name, order);

        let verifies = !self.shared.source.mode().bypasses_cache();
        let mut pending = PendingLeases::new(&self.shared.registry, order.len());
        let mut waiting = Vec::new();

        for (index, bundle) in order.iter().enumerate() {
            let hash = manifest
                .hash_of(bundle)
                .cloned()
                .ok_or_else(|| BundleError::UnknownBundle(bundle.clone()))?;
            let key = BundleKey::new(bundle.clone(), hash);

            if let Some(lease) = self.shared.registry.try_acquire(&key) {
                pending.fill(index, lease);
                continue;
            }

            let (waiter, created) = self.shared.operations.join_or_insert(&key, || {
                LoadOperation::new(key.clone(), manifest.version().clone(), verifies)
            });
            if created {
                self.shared.emit(BundleEvent::Started { key: key.clone() });
                tokio::spawn(loader::drive(self.shared.clone(), waiter.operation().clone()));
            }
            waiting.push((index, key, waiter));
        }

        for (index, key, waiter) in waiting {
            let payload = waiter.wait().await?;
            pending.fill(index, self.shared.registry.acquire(&key, payload));
        }

        let mut leases = pending.into_leases();
        let root = leases
            .pop()
            .ok_or_else(|| BundleError::UnknownBundle(name.clone()))?;
        Ok(BundleHandle::new(root, leases))
    }

    /// Gives back the shares held by `handle`.
    ///
    /// Releasing the same handle (or a clone of it) twice is reported as
    /// [`BundleError::DoubleRelease`] and changes nothing.
    pub fn release_bundle(&self, handle: &BundleHandle) -> BundleResult<()> {
        let registry = &self.shared.registry;
        let outcome = registry.release(handle.lease()).inspect_err(|err| {
            self.shared.error_log.append(handle.name().clone(), err.to_string());
            log::error!("{}", err);
        })?;
        log::debug!("Released {}: {:?}", handle.lease().key(), outcome);

        let mut first_error = None;
        for dependency in handle.dependencies() {
            match registry.release(dependency) {
                Ok(ReleaseOutcome::Unloaded) => {
                    log::debug!("Unloaded {}", dependency.key());
                }
                Ok(_) => {}
                Err(err) => {
                    log::error!("{}", err);
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Records a deployment of `version` and makes it the active version.
    ///
    /// The manifest is fetched and validated first; if that fails, neither
    /// the history nor the active version changes.
    pub async fn deploy_patch(
        &self,
        version: ContentVersion,
        note: impl Into<String>,
    ) -> BundleResult<PatchRecord> {
        self.ensure_running()?;
        let _guard = self.shared.patch_lock.lock().await;

        let manifest = self.shared.manifests.load(&version).await.inspect_err(|err| {
            log::error!("Cannot activate {}: {}", version, err);
        })?;

        let record = PatchRecord::new(version.clone(), note);
        let mut history = self.shared.history.lock().clone();
        history.append(record.clone());
        self.shared.patch_store.save(&history)?;

        *self.shared.history.lock() = history;
        *self.shared.active.write() = Some(manifest);
        log::info!("Active content version is now {}", record.label());
        Ok(record)
    }

    /// Switches to a previously deployed (or any published) version.
    ///
    /// The switch is itself appended to the history; earlier records are
    /// never edited.
    pub async fn switch_patch(&self, version: impl Into<ContentVersion>) -> BundleResult<PatchRecord> {
        let version = version.into();
        let note = match self.shared.history.lock().find(&version) {
            Some(previous) => format!("switch to {}", previous.label()),
            None => format!("switch to {}", version),
        };
        self.deploy_patch(version, note).await
    }

    /// The dependency closure of `name` in load order.
    pub fn resolve(&self, name: &BundleName) -> BundleResult<Vec<BundleName>> {
        resolver::resolve(name, &*self.active_manifest()?)
    }

    /// Per-tick housekeeping: drops unreferenced bundles from memory, trims
    /// the cache and refreshes gauges. Returns the payloads that were unloaded.
    pub fn update(&self) -> Vec<BundleKey> {
        let shared = &self.shared;
        let unloaded = shared.registry.sweep();
        if !unloaded.is_empty() {
            log::debug!("Sweep unloaded {} bundle(s)", unloaded.len());
        }
        shared
            .cache
            .trim_to_quota(|name| shared.registry.is_in_use(name), None);
        shared
            .metrics
            .cache_occupied
            .set(shared.cache.space_occupied() as f64);
        shared.metrics.in_flight.set(shared.operations.len() as f64);
        unloaded
    }

    /// Stops accepting requests, waits for in-flight operations and unloads
    /// everything no longer referenced.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let in_flight = self.shared.operations.operations();
        log::info!("BundleAgent shutting down; waiting for {} operation(s)", in_flight.len());
        for operation in in_flight {
            let _ = operation.wait().await;
        }
        self.update();
        log::info!("BundleAgent shut down");
    }

    /// A read-only snapshot for inspection tooling.
    pub fn diagnostics(&self) -> Diagnostics {
        let shared = &self.shared;
        let manifest = shared.active.read().clone();

        let (cached_bundles, manifest_bundles, dependents) = match &manifest {
            Some(manifest) => {
                let cached = manifest
                    .bundle_names()
                    .filter(|name| {
                        manifest
                            .hash_of(name)
                            .is_some_and(|hash| shared.cache.contains_valid(name, hash))
                    })
                    .count();
                let dependents: BTreeMap<_, _> = manifest
                    .bundle_names()
                    .map(|name| (name.clone(), manifest.dependents_of(name)))
                    .filter(|(_, users)| !users.is_empty())
                    .collect();
                (cached, manifest.len(), dependents)
            }
            None => (0, 0, BTreeMap::new()),
        };

        Diagnostics {
            source_mode: shared.source.mode(),
            active_version: manifest.as_ref().map(|m| m.version().clone()),
            cache_occupied: shared.cache.space_occupied(),
            cache_quota: shared.cache.quota(),
            cached_bundles,
            manifest_bundles,
            loaded_count: shared.registry.loaded_count(),
            loaded: shared.registry.snapshot(),
            in_progress: shared.operations.snapshot(),
            error_log: shared.error_log.entries(),
            patch_history: shared.history.lock().list().to_vec(),
            dependents,
        }
    }

    /// The manifest requests currently resolve against.
    pub fn active_manifest(&self) -> BundleResult<Arc<Manifest>> {
        self.shared
            .active
            .read()
            .clone()
            .ok_or_else(|| BundleError::ManifestUnavailable {
                version: ContentVersion::new("<none>"),
                reason: "no content version has been activated".to_string(),
            })
    }

    /// The active content version, if any.
    pub fn active_version(&self) -> Option<ContentVersion> {
        self.shared.active.read().as_ref().map(|m| m.version().clone())
    }

    /// A copy of the patch history.
    pub fn patch_history(&self) -> PatchHistory {
        self.shared.history.lock().clone()
    }

    /// The mode of the source chosen at start-up.
    pub fn source_mode(&self) -> SourceMode {
        self.shared.source.mode()
    }

    /// The on-disk cache.
    pub fn cache(&self) -> &BundleCache {
        &self.shared.cache
    }

    /// The runtime registry of loaded bundles.
    pub fn registry(&self) -> &RuntimeRegistry {
        &self.shared.registry
    }

    /// The in-flight operations.
    pub fn operations(&self) -> &OperationRegistry {
        &self.shared.operations
    }

    /// The log of terminal failures.
    pub fn error_log(&self) -> &ErrorLog {
        &self.shared.error_log
    }

    fn ensure_running(&self) -> BundleResult<()> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(BundleError::ShutDown);
        }
        Ok(())
    }
}
