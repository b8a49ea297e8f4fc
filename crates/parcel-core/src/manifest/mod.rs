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

//! The manifest: the authoritative table of bundle names, content hashes and
//! dependency edges for one deployed content version.
//!
//! A [`Manifest`] is an immutable snapshot. It is validated once, when it is
//! built from its serialized records, so every later consumer may assume that
//! dependency names resolve and that the dependency graph is acyclic.

use crate::bundle::{BundleName, ContentHash, ContentVersion};
use crate::error::{BundleError, BundleResult};
use crate::graph::{depth_first_post_order, WalkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the serialized manifest, as written by the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// The bundle name.
    pub name: BundleName,
    /// The expected content hash of the payload.
    pub hash: ContentHash,
    /// Direct dependencies, in the order the loader should visit them.
    #[serde(default)]
    pub dependencies: Vec<BundleName>,
}

/// The serialized form of a manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    /// The version the build pipeline stamped into the file, if any.
    #[serde(default)]
    pub version: Option<ContentVersion>,
    /// Every bundle of the build.
    pub bundles: Vec<ManifestRecord>,
}

/// What the manifest knows about a single bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// The expected content hash of the payload.
    pub hash: ContentHash,
    /// Direct dependency names, in declaration order.
    pub dependencies: Vec<BundleName>,
}

/// A validated, immutable manifest snapshot.
#[derive(Debug, Clone)]
pub struct Manifest {
    version: ContentVersion,
    entries: HashMap<BundleName, ManifestEntry>,
    order: Vec<BundleName>,
}

impl Manifest {
    /// Builds and validates a manifest.
    ///
    /// # Errors
    ///
    /// * [`BundleError::ManifestCorrupt`] when a name is listed twice or a
    ///   dependency names a bundle that has no entry.
    /// * [`BundleError::CyclicDependency`] when the dependency graph has a cycle.
    pub fn from_records(
        version: ContentVersion,
        records: impl IntoIterator<Item = ManifestRecord>,
    ) -> BundleResult<Self> {
        let mut entries = HashMap::new();
        let mut order = Vec::new();

        for record in records {
            if entries.contains_key(&record.name) {
                return Err(BundleError::ManifestCorrupt(format!(
                    "bundle '{}' is listed more than once",
                    record.name
                )));
            }
            order.push(record.name.clone());
            entries.insert(
                record.name,
                ManifestEntry {
                    hash: record.hash,
                    dependencies: record.dependencies,
                },
            );
        }

        for name in &order {
            let entry = &entries[name];
            if let Some(dangling) = entry
                .dependencies
                .iter()
                .find(|dep| !entries.contains_key(*dep))
            {
                return Err(BundleError::ManifestCorrupt(format!(
                    "bundle '{name}' depends on '{dangling}', which has no entry"
                )));
            }
        }

        depth_first_post_order(order.iter().cloned(), |name: &BundleName| {
            entries.get(name).map(|entry| entry.dependencies.clone())
        })
        .map_err(|err| match err {
            WalkError::Cycle(bundle) => BundleError::CyclicDependency { bundle },
            WalkError::Missing(name) => {
                BundleError::ManifestCorrupt(format!("bundle '{name}' has no entry"))
            }
        })?;

        log::debug!(
            "Validated manifest {} with {} bundle(s).",
            version,
            order.len()
        );

        Ok(Self {
            version,
            entries,
            order,
        })
    }

    /// Builds a manifest from a decoded document. The version passed in wins
    /// over the one stamped in the file, since it is what the caller asked for.
    pub fn from_document(version: ContentVersion, document: ManifestDocument) -> BundleResult<Self> {
        if let Some(stamped) = &document.version {
            if *stamped != version {
                log::warn!(
                    "Manifest requested as {} is stamped {}; keeping the requested version.",
                    version,
                    stamped
                );
            }
        }
        Self::from_records(version, document.bundles)
    }

    /// Builds a manifest without the dangling-name and cycle checks.
    #[cfg(test)]
    pub(crate) fn unchecked(version: ContentVersion, records: Vec<ManifestRecord>) -> Self {
        let order = records.iter().map(|r| r.name.clone()).collect();
        let entries = records
            .into_iter()
            .map(|r| {
                (
                    r.name,
                    ManifestEntry {
                        hash: r.hash,
                        dependencies: r.dependencies,
                    },
                )
            })
            .collect();
        Self {
            version,
            entries,
            order,
        }
    }

    /// The content version this manifest describes.
    pub fn version(&self) -> &ContentVersion {
        &self.version
    }

    /// Looks up a bundle.
    pub fn get(&self, name: &BundleName) -> Option<&ManifestEntry> {
        self.entries.get(name)
    }

    /// Returns `true` if the bundle is listed.
    pub fn contains(&self, name: &BundleName) -> bool {
        self.entries.contains_key(name)
    }

    /// The expected hash of a bundle.
    pub fn hash_of(&self, name: &BundleName) -> Option<&ContentHash> {
        self.entries.get(name).map(|entry| &entry.hash)
    }

    /// The direct dependencies of a bundle, in declaration order.
    pub fn dependencies(&self, name: &BundleName) -> Option<&[BundleName]> {
        self.entries
            .get(name)
            .map(|entry| entry.dependencies.as_slice())
    }

    /// The bundles that list `name` as a direct dependency, in declaration order.
    pub fn dependents_of(&self, name: &BundleName) -> Vec<BundleName> {
        self.order
            .iter()
            .filter(|candidate| {
                self.entries[*candidate]
                    .dependencies
                    .iter()
                    .any(|dep| dep == name)
            })
            .cloned()
            .collect()
    }

    /// Every bundle name, in declaration order.
    pub fn bundle_names(&self) -> impl Iterator<Item = &BundleName> {
        self.order.iter()
    }

    /// The number of bundles.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the manifest lists no bundles.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Converts the manifest back into its serialized form.
    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument {
            version: Some(self.version.clone()),
            bundles: self
                .order
                .iter()
                .map(|name| {
                    let entry = &self.entries[name];
                    ManifestRecord {
                        name: name.clone(),
                        hash: entry.hash.clone(),
                        dependencies: entry.dependencies.clone(),
                    }
                })
                .collect(),
        }
    }
}
