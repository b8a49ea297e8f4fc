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

//! The append-only deployment log that decides which manifest is active.
//!
//! History is the durable truth; the "current" manifest is only a pointer
//! derived from its last record. Switching versions therefore appends a new
//! record rather than editing an old one.

use crate::bundle::ContentVersion;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One deployment of a content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRecord {
    /// When the version was deployed, in seconds since the Unix epoch.
    pub deploy_time: u64,
    /// The deployed content version.
    pub version: ContentVersion,
    /// A free-text note describing the deployment.
    #[serde(default)]
    pub note: String,
}

impl PatchRecord {
    /// Creates a record stamped with the current time.
    pub fn new(version: ContentVersion, note: impl Into<String>) -> Self {
        let deploy_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            deploy_time,
            version,
            note: note.into(),
        }
    }

    /// Creates a record with an explicit timestamp.
    pub fn at(deploy_time: u64, version: ContentVersion, note: impl Into<String>) -> Self {
        Self {
            deploy_time,
            version,
            note: note.into(),
        }
    }

    /// A one-line label such as `[9f3a] hotfix for login screen`.
    pub fn label(&self) -> String {
        format!("[{}] {}", self.version.short(), self.note)
    }
}

/// An ordered, append-only sequence of deployments, newest last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchHistory {
    records: Vec<PatchRecord>,
}

impl PatchHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a deployment.
    pub fn append(&mut self, record: PatchRecord) {
        log::info!("Patch history: appended {}", record.label());
        self.records.push(record);
    }

    /// The most recently appended record.
    pub fn current(&self) -> Option<&PatchRecord> {
        self.records.last()
    }

    /// Every record, oldest first.
    pub fn list(&self) -> &[PatchRecord] {
        &self.records
    }

    /// The latest record that deployed `version`.
    pub fn find(&self, version: &ContentVersion) -> Option<&PatchRecord> {
        self.records.iter().rev().find(|r| &r.version == version)
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing has been deployed yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_last_appended() {
        let mut history = PatchHistory::new();
        assert!(history.current().is_none());

        history.append(PatchRecord::at(10, "aaaa1111".into(), "first"));
        history.append(PatchRecord::at(20, "bbbb2222".into(), "second"));
        assert_eq!(history.current().unwrap().version.as_str(), "bbbb2222");

        // Going back to an older version is another append; nothing is rewritten.
        history.append(PatchRecord::at(30, "aaaa1111".into(), "rollback"));
        assert_eq!(history.len(), 3);
        assert_eq!(history.list()[0].note, "first");
        assert_eq!(history.current().unwrap().version.as_str(), "aaaa1111");
        assert_eq!(history.find(&"aaaa1111".into()).unwrap().note, "rollback");
    }

    #[test]
    fn label_uses_short_version() {
        let record = PatchRecord::at(0, "9f3a77c1".into(), "login fix");
        assert_eq!(record.label(), "[9f3a] login fix");
    }
}
