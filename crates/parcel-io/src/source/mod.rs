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

//! Content sources and the start-up strategy that picks one of them.

mod local_server;
mod remote;
mod simulated;
mod transport;

pub use local_server::LocalServerSource;
pub use remote::RemoteSource;
pub use simulated::SimulatedSource;
pub use transport::{HttpTransport, ReqwestTransport};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parcel_core::{BundleName, BundleSource, ContentVersion, FetchError, SourceMode};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// The file name under which every source publishes its manifest.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Where content comes from. Mirrors the `[source]` section of the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Which source to use.
    pub mode: SourceMode,
    /// Content root for [`SourceMode::Simulated`].
    pub simulated_root: PathBuf,
    /// Base URL of the development server.
    pub local_server_url: String,
    /// Base URL of the distribution endpoint. Required in remote mode.
    pub remote_url: Option<String>,
    /// Optional platform segment inserted after the base URL.
    pub platform: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            simulated_root: PathBuf::from("bundles"),
            local_server_url: "http://127.0.0.1:7888".to_string(),
            remote_url: None,
            platform: None,
        }
    }
}

/// The closed set of content sources, chosen once per process.
#[derive(Debug, Clone)]
pub enum SourceStrategy {
    /// Local files, no network.
    Simulated(SimulatedSource),
    /// A development server on loopback.
    LocalServer(LocalServerSource),
    /// The remote distribution endpoint.
    Remote(RemoteSource),
}

impl SourceStrategy {
    /// Builds the source selected by `config`, using `reqwest` for the
    /// server-backed variants.
    pub fn select(config: &SourceConfig) -> Result<Arc<dyn BundleSource>> {
        Self::select_with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Builds the source selected by `config` on top of a custom transport.
    pub fn select_with_transport(
        config: &SourceConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Arc<dyn BundleSource>> {
        let strategy = match config.mode {
            SourceMode::Simulated => {
                SourceStrategy::Simulated(SimulatedSource::new(&config.simulated_root))
            }
            SourceMode::LocalServer => SourceStrategy::LocalServer(LocalServerSource::new(
                config.local_server_url.clone(),
                config.platform.clone(),
                transport,
            )),
            SourceMode::Remote => {
                let Some(url) = config.remote_url.clone().filter(|u| !u.trim().is_empty()) else {
                    bail!("source mode is 'remote' but no remote_url is configured");
                };
                SourceStrategy::Remote(RemoteSource::new(url, config.platform.clone(), transport))
            }
        };
        log::info!("Bundle source selected: {}", strategy.mode());
        Ok(Arc::new(strategy))
    }

    fn inner(&self) -> &dyn BundleSource {
        match self {
            SourceStrategy::Simulated(source) => source,
            SourceStrategy::LocalServer(source) => source,
            SourceStrategy::Remote(source) => source,
        }
    }
}

#[async_trait]
impl BundleSource for SourceStrategy {
    fn mode(&self) -> SourceMode {
        self.inner().mode()
    }

    async fn fetch_manifest(&self, version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        self.inner().fetch_manifest(version).await
    }

    async fn fetch(
        &self,
        name: &BundleName,
        version: &ContentVersion,
    ) -> Result<Vec<u8>, FetchError> {
        self.inner().fetch(name, version).await
    }
}

pub(crate) fn join_url<'a>(base: &str, segments: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments.into_iter().flatten() {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }
    url
}
