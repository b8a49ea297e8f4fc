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

//! Read-only snapshot of the loader for inspection tooling.

use super::operation::OperationSnapshot;
use parcel_core::{BundleName, ContentVersion, PatchRecord, SourceMode};
use parcel_data::{ErrorLogEntry, LoadedBundleInfo};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Everything an inspector panel shows about the bundle manager.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// The active source.
    pub source_mode: SourceMode,
    /// The active content version.
    pub active_version: Option<ContentVersion>,
    /// Bytes held by the on-disk cache.
    pub cache_occupied: u64,
    /// The cache quota in bytes.
    pub cache_quota: u64,
    /// How many bundles of the active manifest have a valid cache entry.
    pub cached_bundles: usize,
    /// How many bundles the active manifest lists.
    pub manifest_bundles: usize,
    /// Payloads held in memory.
    pub loaded_count: usize,
    /// Per-payload residency details.
    pub loaded: Vec<LoadedBundleInfo>,
    /// Operations that have not reached a terminal state.
    pub in_progress: Vec<OperationSnapshot>,
    /// Recent terminal failures, oldest first.
    pub error_log: Vec<ErrorLogEntry>,
    /// Deployments, oldest first.
    pub patch_history: Vec<PatchRecord>,
    /// For every bundle that others depend on, the bundles depending on it.
    pub dependents: BTreeMap<BundleName, Vec<BundleName>>,
}

impl Diagnostics {
    /// A compact multi-line summary for logs and terminals.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let version = self
            .active_version
            .as_ref()
            .map_or("none".to_string(), |v| v.to_string());
        let _ = writeln!(out, "source: {}  version: {}", self.source_mode, version);
        let _ = writeln!(
            out,
            "cache: {} / {} bytes, cached {}/{}",
            self.cache_occupied, self.cache_quota, self.cached_bundles, self.manifest_bundles
        );
        let _ = writeln!(out, "loaded: {}", self.loaded_count);
        for info in &self.loaded {
            let _ = writeln!(out, "  {} refs={} {:?}", info.key, info.refcount, info.state);
        }
        let _ = writeln!(out, "in progress: {}", self.in_progress.len());
        for op in &self.in_progress {
            let _ = writeln!(out, "  {} {} ({} waiting)", op.key, op.state, op.waiters);
        }
        if !self.error_log.is_empty() {
            let _ = writeln!(out, "errors:");
            for entry in &self.error_log {
                let _ = writeln!(out, "  {}: {}", entry.bundle, entry.message);
            }
        }
        let _ = writeln!(out, "patches:");
        for record in self.patch_history.iter().rev() {
            let _ = writeln!(out, "  {}", record.label());
        }
        out
    }
}
