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

//! Stopwatch and RAII-based timer for recording durations into histograms.

use crate::metrics::registry::HistogramHandle;
use std::time::{Duration, Instant};

/// A monotonic stopwatch started on creation.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Starts a new stopwatch.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time elapsed since the stopwatch was started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time in milliseconds, with sub-millisecond precision.
    pub fn elapsed_ms_f64(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Times a scope and records the result in a histogram when dropped.
///
/// The measurement is recorded even on early returns.
pub struct ScopedMetricTimer<'a> {
    stopwatch: Stopwatch,
    histogram: &'a HistogramHandle,
}

impl<'a> ScopedMetricTimer<'a> {
    /// Creates a new timer for the given histogram and starts it immediately.
    pub fn new(histogram: &'a HistogramHandle) -> Self {
        Self {
            stopwatch: Stopwatch::new(),
            histogram,
        }
    }
}

/// Records the elapsed time in milliseconds.
impl Drop for ScopedMetricTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.stopwatch.elapsed_ms_f64());
    }
}
