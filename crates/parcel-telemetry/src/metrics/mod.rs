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

//! Metric identifiers, values and errors.

pub mod registry;

use serde::Serialize;
use std::fmt::{self, Display};
use thiserror::Error;

/// A structured identifier for a metric: a namespace plus a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    /// The broad category of the metric (e.g. "bundles", "cache").
    pub namespace: String,
    /// The specific name of the metric (e.g. "cache_hits").
    pub name: String,
}

impl MetricId {
    /// Creates a new `MetricId` with a namespace and a name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// The fundamental type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricType {
    /// A value that only ever increases.
    Counter,
    /// A value that can go up or down.
    Gauge,
    /// A distribution of observations over fixed buckets.
    Histogram,
}

/// The current value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    /// A counter's total.
    Counter {
        /// The total.
        value: u64,
    },
    /// A gauge's current value.
    Gauge {
        /// The current value.
        value: f64,
    },
    /// A histogram summary.
    Histogram {
        /// Number of observations.
        count: u64,
        /// Sum of all observations.
        sum: f64,
        /// Upper bounds of the buckets.
        bucket_bounds: Vec<f64>,
        /// Observations per bucket; the last slot counts values above every bound.
        bucket_counts: Vec<u64>,
    },
}

impl MetricValue {
    /// Returns the [`MetricType`] corresponding to this value.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter { .. } => MetricType::Counter,
            MetricValue::Gauge { .. } => MetricType::Gauge,
            MetricValue::Histogram { .. } => MetricType::Histogram,
        }
    }
}

/// A point-in-time copy of one registered metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// `namespace:name`.
    pub id: String,
    /// What the metric measures.
    pub description: String,
    /// The unit of the values, if any.
    pub unit: String,
    /// The value.
    pub value: MetricValue,
}

/// Errors raised by the metrics registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    /// A metric was registered again with a different type.
    #[error("metric {id} is a {found:?}, not a {expected:?}")]
    TypeMismatch {
        /// The metric.
        id: String,
        /// The type the caller asked for.
        expected: MetricType,
        /// The type already registered.
        found: MetricType,
    },
}

/// A specialized `Result` for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
