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

//! Durable storage for the patch history.

use crate::cache::write_atomic;
use parcel_core::{BundleError, BundleResult, PatchHistory};
use std::path::{Path, PathBuf};

/// Reads and writes the patch history as a JSON file.
#[derive(Debug, Clone)]
pub struct PatchStore {
    path: PathBuf,
}

impl PatchStore {
    /// Creates a store for the history file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The history file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the history. A missing file is an empty history.
    pub fn load(&self) -> BundleResult<PatchHistory> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No patch history at {}; starting empty",
                    self.path.display()
                );
                return Ok(PatchHistory::new());
            }
            Err(err) => return Err(storage_error(&self.path, err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| storage_error(&self.path, err))
    }

    /// Replaces the history file with `history`.
    pub fn save(&self, history: &PatchHistory) -> BundleResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| storage_error(parent, err))?;
        }
        let bytes =
            serde_json::to_vec_pretty(history).map_err(|err| storage_error(&self.path, err))?;
        write_atomic(&self.path, &bytes).map_err(|err| storage_error(&self.path, err))
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> BundleError {
    BundleError::Storage(format!("{}: {}", path.display(), err))
}
