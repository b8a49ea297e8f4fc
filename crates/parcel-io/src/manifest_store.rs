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

//! Loads, decodes and memoizes manifests per content version.

use parcel_core::{
    BundleError, BundleResult, BundleSource, ContentVersion, Manifest, ManifestDocument,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Fetches manifests through the active [`BundleSource`] and keeps every
/// version it has validated, so switching back to an earlier patch does not
/// hit the network again.
#[derive(Debug)]
pub struct ManifestStore {
    source: Arc<dyn BundleSource>,
    loaded: Mutex<HashMap<ContentVersion, Arc<Manifest>>>,
}

impl ManifestStore {
    /// Creates a store backed by `source`.
    pub fn new(source: Arc<dyn BundleSource>) -> Self {
        Self {
            source,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the manifest for `version`, fetching and validating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// - [`BundleError::ManifestUnavailable`] if the source cannot provide it.
    /// - [`BundleError::ManifestCorrupt`] if it cannot be decoded or names a
    ///   dependency it does not list.
    /// - [`BundleError::CyclicDependency`] if its dependency graph has a cycle.
    pub async fn load(&self, version: &ContentVersion) -> BundleResult<Arc<Manifest>> {
        if let Some(manifest) = self.get_loaded(version) {
            return Ok(manifest);
        }

        let bytes = self.source.fetch_manifest(version).await.map_err(|err| {
            BundleError::ManifestUnavailable {
                version: version.clone(),
                reason: err.to_string(),
            }
        })?;
        let manifest = Arc::new(Self::decode(version.clone(), &bytes)?);
        log::info!(
            "Loaded manifest {} with {} bundle(s) from the {} source",
            version,
            manifest.len(),
            self.source.mode()
        );

        let mut loaded = self.loaded.lock();
        Ok(loaded
            .entry(version.clone())
            .or_insert(manifest)
            .clone())
    }

    /// The manifest for `version` if it has already been loaded.
    pub fn get_loaded(&self, version: &ContentVersion) -> Option<Arc<Manifest>> {
        self.loaded.lock().get(version).cloned()
    }

    /// Drops a memoized manifest so the next `load` fetches it again.
    pub fn forget(&self, version: &ContentVersion) -> bool {
        self.loaded.lock().remove(version).is_some()
    }

    /// Decodes and validates a serialized manifest.
    ///
    /// Documents starting with `{` are read as JSON; anything else is read as
    /// a bincode-encoded [`ManifestDocument`].
    pub fn decode(version: ContentVersion, bytes: &[u8]) -> BundleResult<Manifest> {
        let is_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');

        let document: ManifestDocument = if is_json {
            serde_json::from_slice(bytes)
                .map_err(|e| BundleError::ManifestCorrupt(format!("invalid JSON manifest: {e}")))?
        } else {
            let (document, _) =
                bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(
                    |e| BundleError::ManifestCorrupt(format!("invalid binary manifest: {e}")),
                )?;
            document
        };

        Manifest::from_document(version, document)
    }
}
