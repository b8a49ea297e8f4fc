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

//! The public-facing SDK for the Parcel bundle manager.
//!
//! An application builds one [`Parcel`] at start-up, passes it (or its
//! [`BundleAgent`]) to whatever needs bundles, calls [`Parcel::tick`] from its
//! frame or tick loop and [`Parcel::shutdown`] on exit.

pub mod config;

use anyhow::{Context, Result};
use parcel_agents::{BundleAgent, BundleEvent, Diagnostics};
use parcel_core::{BundleHandle, BundleName, BundleResult, BundleSource, ContentVersion, PatchRecord};
use parcel_io::{BundleCache, PatchStore, SourceStrategy};
use parcel_telemetry::{logging, MetricSnapshot, MetricsRegistry};
use std::sync::Arc;

pub use config::{CacheConfig, ParcelConfig, DEFAULT_CONFIG_FILE, SOURCE_MODE_ENV};

pub mod prelude {
    //! The types most applications need.
    pub use crate::{Parcel, ParcelConfig};
    pub use parcel_agents::{BundleEvent, Diagnostics, LoaderConfig};
    pub use parcel_core::{
        BundleError, BundleHandle, BundleName, BundleResult, ContentHash, ContentVersion,
        PatchRecord, SourceMode,
    };
    pub use parcel_data::UnloadPolicy;
    pub use parcel_io::SourceConfig;
}

/// The process-wide bundle manager.
///
/// Constructed once, explicitly, and handed to the parts of the application
/// that need bundles.
pub struct Parcel {
    config: ParcelConfig,
    metrics: MetricsRegistry,
    agent: BundleAgent,
}

impl Parcel {
    /// Initializes logging, selects the content source and activates the
    /// content version to run with.
    ///
    /// `config` is used as given; [`ParcelConfig::load`] is what folds in
    /// the environment.
    pub async fn init(config: ParcelConfig) -> Result<Self> {
        logging::init(&config.log_filter);
        let source = SourceStrategy::select(&config.source).context("Failed to select a bundle source")?;
        Self::with_source(config, source).await
    }

    /// Builds the manager on top of an already constructed source.
    pub async fn with_source(config: ParcelConfig, source: Arc<dyn BundleSource>) -> Result<Self> {
        let cache = BundleCache::open(&config.cache.directory, config.cache.quota_bytes)
            .with_context(|| {
                format!("Failed to open bundle cache at '{}'", config.cache.directory.display())
            })?;
        let metrics = MetricsRegistry::new();
        let agent = BundleAgent::new(
            config.loader.clone(),
            source,
            cache,
            PatchStore::new(&config.history_path),
            &metrics,
        )?;

        let active = agent
            .start(config.initial_version.clone())
            .await
            .context("Failed to activate a content version")?;
        match &active {
            Some(version) => log::info!("Parcel ready on content version {}", version),
            None => log::info!("Parcel ready; no content version deployed yet"),
        }

        Ok(Self {
            config,
            metrics,
            agent,
        })
    }

    /// Attaches a channel receiving a [`BundleEvent`] per load.
    pub fn with_event_sender(mut self, sender: crossbeam_channel::Sender<BundleEvent>) -> Self {
        self.agent = self.agent.with_event_sender(sender);
        self
    }

    /// The agent that owns the bundle lifecycle.
    pub fn agent(&self) -> &BundleAgent {
        &self.agent
    }

    /// The configuration the manager was built with (after overrides).
    pub fn config(&self) -> &ParcelConfig {
        &self.config
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Snapshot of the loader metrics.
    pub fn metric_snapshot(&self) -> Vec<MetricSnapshot> {
        self.metrics.namespace_snapshot("bundles")
    }

    /// See [`BundleAgent::request_bundle`].
    pub async fn request_bundle(&self, name: impl Into<BundleName>) -> BundleResult<BundleHandle> {
        self.agent.request_bundle(name).await
    }

    /// See [`BundleAgent::release_bundle`].
    pub fn release_bundle(&self, handle: &BundleHandle) -> BundleResult<()> {
        self.agent.release_bundle(handle)
    }

    /// See [`BundleAgent::switch_patch`].
    pub async fn switch_patch(&self, version: impl Into<ContentVersion>) -> BundleResult<PatchRecord> {
        self.agent.switch_patch(version).await
    }

    /// See [`BundleAgent::deploy_patch`].
    pub async fn deploy_patch(
        &self,
        version: impl Into<ContentVersion>,
        note: impl Into<String>,
    ) -> BundleResult<PatchRecord> {
        self.agent.deploy_patch(version.into(), note).await
    }

    /// See [`BundleAgent::diagnostics`].
    pub fn diagnostics(&self) -> Diagnostics {
        self.agent.diagnostics()
    }

    /// Per-tick housekeeping; call from the application's loop.
    pub fn tick(&self) {
        self.agent.update();
    }

    /// Waits for in-flight loads and releases everything unreferenced.
    pub async fn shutdown(self) {
        self.agent.shutdown().await;
        for metric in self.metric_snapshot() {
            log::debug!("{} = {:?}", metric.id, metric.value);
        }
    }
}
