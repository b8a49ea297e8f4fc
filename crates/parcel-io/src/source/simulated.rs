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

use super::MANIFEST_FILE_NAME;
use async_trait::async_trait;
use parcel_core::{BundleName, BundleSource, ContentVersion, FetchError, SourceMode};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Serves content that already sits on the local disk.
///
/// Items are looked up under `<root>/<version>/` first and then directly under
/// `<root>/`, so an unversioned asset folder works without any layout.
/// Versions and bundle names must be relative paths without `..`; anything
/// else is reported as not found rather than read from outside the root.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    root: PathBuf,
}

impl SimulatedSource {
    /// Creates a source reading from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contained(&self, parts: &[&str]) -> Result<PathBuf, FetchError> {
        let mut path = self.root.clone();
        for part in parts {
            let relative = Path::new(part);
            if !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
            {
                return Err(FetchError::not_found(format!(
                    "'{}' does not name an item inside {}",
                    part,
                    self.root.display()
                )));
            }
            path.push(relative);
        }
        Ok(path)
    }

    async fn read(&self, version: &ContentVersion, item: &str) -> Result<Vec<u8>, FetchError> {
        let versioned = self.contained(&[version.as_str(), item])?;
        match tokio::fs::read(&versioned).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            Err(_) => {}
        }

        let flat = self.contained(&[item])?;
        tokio::fs::read(&flat).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                FetchError::not_found(format!(
                    "'{}' is neither in {} nor in {}",
                    item,
                    versioned.display(),
                    flat.display()
                ))
            } else {
                err.into()
            }
        })
    }
}

#[async_trait]
impl BundleSource for SimulatedSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Simulated
    }

    async fn fetch_manifest(&self, version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        self.read(version, MANIFEST_FILE_NAME).await
    }

    async fn fetch(
        &self,
        name: &BundleName,
        version: &ContentVersion,
    ) -> Result<Vec<u8>, FetchError> {
        self.read(version, name.as_str()).await
    }
}
