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

//! Tuning knobs of the bundle loader.

use parcel_data::UnloadPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Mirrors the `[loader]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How many load operations may hold a loader slot at once.
    pub max_concurrent_loads: usize,
    /// Fetch attempts per operation for sources that retry.
    pub max_fetch_attempts: u32,
    /// Upper bound on a single fetch attempt.
    pub fetch_timeout_ms: u64,
    /// Backoff before the second attempt; doubles on every further attempt.
    pub backoff_base_ms: u64,
    /// Ceiling for the backoff delay.
    pub backoff_max_ms: u64,
    /// How many failures the error log keeps.
    pub error_log_capacity: usize,
    /// When unreferenced bundles leave memory.
    pub unload_policy: UnloadPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            max_fetch_attempts: 3,
            fetch_timeout_ms: 30_000,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            error_log_capacity: 64,
            unload_policy: UnloadPolicy::Deferred,
        }
    }
}

impl LoaderConfig {
    /// The per-attempt timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// The delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at the configured maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let config = LoaderConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(60), Duration::from_millis(500));
    }
}
