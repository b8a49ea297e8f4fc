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

use super::{join_url, HttpTransport, MANIFEST_FILE_NAME};
use async_trait::async_trait;
use parcel_core::{BundleName, BundleSource, ContentVersion, FetchError, SourceMode};
use std::sync::Arc;

/// Fetches from a development server on loopback.
///
/// The development server always serves its latest build, so URLs carry no
/// version segment: `<base>/[<platform>/]<name>`.
#[derive(Debug, Clone)]
pub struct LocalServerSource {
    base_url: String,
    platform: Option<String>,
    transport: Arc<dyn HttpTransport>,
}

impl LocalServerSource {
    /// Creates a source for the server at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        platform: Option<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            platform,
            transport,
        }
    }

    /// The URL of one item on the server.
    pub fn url_for(&self, item: &str) -> String {
        join_url(&self.base_url, [self.platform.as_deref(), Some(item)])
    }
}

#[async_trait]
impl BundleSource for LocalServerSource {
    fn mode(&self) -> SourceMode {
        SourceMode::LocalServer
    }

    async fn fetch_manifest(&self, _version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        self.transport.get(&self.url_for(MANIFEST_FILE_NAME)).await
    }

    async fn fetch(
        &self,
        name: &BundleName,
        _version: &ContentVersion,
    ) -> Result<Vec<u8>, FetchError> {
        log::trace!("GET {} from the local server", name);
        self.transport.get(&self.url_for(name.as_str())).await
    }
}
