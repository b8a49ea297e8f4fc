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

use parcel_core::{BundleName, ContentHash};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub(crate) const PAYLOAD_EXTENSION: &str = "bundle";
pub(crate) const SIDECAR_EXTENSION: &str = "meta";
pub(crate) const TEMP_EXTENSION: &str = "tmp";

/// The sidecar committed next to every cached payload.
///
/// It records which content hash the bytes were verified against, so entries
/// can be validated across restarts without re-downloading or re-hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The bundle name.
    pub name: BundleName,
    /// The hash the payload matched when it was committed.
    pub hash: ContentHash,
    /// Payload size in bytes.
    pub size: u64,
    /// Commit time, unix seconds.
    pub committed_at: u64,
}

/// File stem for a bundle: bundle names may contain path separators or
/// characters a filesystem rejects, so the stem is derived from a digest.
pub(crate) fn file_stem(name: &BundleName) -> String {
    let digest = blake3::hash(name.as_str().as_bytes()).to_hex();
    digest.as_str()[..32].to_string()
}

pub(crate) fn payload_path(directory: &Path, name: &BundleName) -> PathBuf {
    directory.join(format!("{}.{PAYLOAD_EXTENSION}", file_stem(name)))
}

pub(crate) fn sidecar_path(directory: &Path, name: &BundleName) -> PathBuf {
    directory.join(format!("{}.{SIDECAR_EXTENSION}", file_stem(name)))
}

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(TEMP_EXTENSION);
    PathBuf::from(raw)
}

/// Writes `bytes` to `path` through a temporary file and a rename, so a crash
/// never leaves a half-written file under the final name.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp = temp_path(path);
    std::fs::write(&temp, bytes)?;
    std::fs::rename(&temp, path)
}
