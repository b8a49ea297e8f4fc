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

//! A bounded, append-only log of terminal failures.

use parcel_core::BundleName;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// One logged failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLogEntry {
    /// When the failure was recorded, in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// The bundle whose load failed.
    pub bundle: BundleName,
    /// The rendered error.
    pub message: String,
}

/// Keeps the most recent failures, dropping the oldest once `capacity` is
/// exceeded. Safe to share between concurrently completing operations.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorLogEntry>>,
}

impl ErrorLog {
    /// Creates a log holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Records a failure.
    pub fn append(&self, bundle: BundleName, message: impl Into<String>) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ErrorLogEntry {
            timestamp_ms,
            bundle,
            message: message.into(),
        });
    }

    /// Every retained entry, oldest first.
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been logged (or everything was cleared).
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Renders the log as text, one `bundle: message` line per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.lock().iter() {
            let _ = writeln!(out, "{}: {}", entry.bundle, entry.message);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_dropped_beyond_capacity() {
        let log = ErrorLog::new(2);
        log.append("a".into(), "first");
        log.append("b".into(), "second");
        log.append("c".into(), "third");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].bundle.as_str(), "b");
        assert_eq!(entries[1].message, "third");
    }

    #[test]
    fn render_lists_one_line_per_entry() {
        let log = ErrorLog::new(8);
        log.append("ui".into(), "timed out");
        assert_eq!(log.render(), "ui: timed out\n");
        log.clear();
        assert!(log.is_empty());
    }
}
