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

//! Registry for managing metrics.

use super::{MetricId, MetricSnapshot, MetricType, MetricValue, MetricsError, MetricsResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    bucket_bounds: Vec<f64>,
    bucket_counts: Vec<u64>,
}

#[derive(Debug, Clone)]
enum MetricCell {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicU64>),
    Histogram(Arc<Mutex<HistogramState>>),
}

impl MetricCell {
    fn metric_type(&self) -> MetricType {
        match self {
            MetricCell::Counter(_) => MetricType::Counter,
            MetricCell::Gauge(_) => MetricType::Gauge,
            MetricCell::Histogram(_) => MetricType::Histogram,
        }
    }

    fn value(&self) -> MetricValue {
        match self {
            MetricCell::Counter(v) => MetricValue::Counter {
                value: v.load(Ordering::Relaxed),
            },
            MetricCell::Gauge(v) => MetricValue::Gauge {
                value: f64::from_bits(v.load(Ordering::Relaxed)),
            },
            MetricCell::Histogram(state) => {
                let state = state.lock();
                MetricValue::Histogram {
                    count: state.count,
                    sum: state.sum,
                    bucket_bounds: state.bucket_bounds.clone(),
                    bucket_counts: state.bucket_counts.clone(),
                }
            }
        }
    }
}

#[derive(Debug)]
struct RegisteredMetric {
    description: String,
    unit: String,
    cell: MetricCell,
}

/// Central registry for the metrics of one bundle manager.
///
/// Registration is idempotent: registering an existing id with the same type
/// returns a handle to the same underlying value. Handles update their value
/// without going through the registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: Mutex<BTreeMap<MetricId, RegisteredMetric>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        id: MetricId,
        description: String,
        unit: String,
        make: impl FnOnce() -> MetricCell,
        expected: MetricType,
    ) -> MetricsResult<MetricCell> {
        let mut metrics = self.metrics.lock();
        if let Some(existing) = metrics.get(&id) {
            let found = existing.cell.metric_type();
            if found != expected {
                return Err(MetricsError::TypeMismatch {
                    id: id.to_string(),
                    expected,
                    found,
                });
            }
            return Ok(existing.cell.clone());
        }
        let cell = make();
        metrics.insert(
            id,
            RegisteredMetric {
                description,
                unit,
                cell: cell.clone(),
            },
        );
        Ok(cell)
    }

    /// Registers (or looks up) a counter.
    pub fn register_counter(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> MetricsResult<CounterHandle> {
        let id = MetricId::new(namespace, name);
        let cell = self.register(
            id.clone(),
            description.into(),
            String::new(),
            || MetricCell::Counter(Arc::new(AtomicU64::new(0))),
            MetricType::Counter,
        )?;
        match cell {
            MetricCell::Counter(value) => Ok(CounterHandle { id, value }),
            other => Err(mismatch(&id, MetricType::Counter, other.metric_type())),
        }
    }

    /// Registers (or looks up) a gauge.
    pub fn register_gauge(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> MetricsResult<GaugeHandle> {
        let id = MetricId::new(namespace, name);
        let cell = self.register(
            id.clone(),
            description.into(),
            unit.into(),
            || MetricCell::Gauge(Arc::new(AtomicU64::new(0f64.to_bits()))),
            MetricType::Gauge,
        )?;
        match cell {
            MetricCell::Gauge(value) => Ok(GaugeHandle { id, value }),
            other => Err(mismatch(&id, MetricType::Gauge, other.metric_type())),
        }
    }

    /// Registers (or looks up) a histogram with the given bucket upper bounds.
    pub fn register_histogram(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        mut buckets: Vec<f64>,
    ) -> MetricsResult<HistogramHandle> {
        let id = MetricId::new(namespace, name);
        buckets.sort_by(f64::total_cmp);
        let cell = self.register(
            id.clone(),
            description.into(),
            unit.into(),
            || {
                MetricCell::Histogram(Arc::new(Mutex::new(HistogramState {
                    bucket_counts: vec![0; buckets.len() + 1],
                    bucket_bounds: buckets,
                    ..Default::default()
                })))
            },
            MetricType::Histogram,
        )?;
        match cell {
            MetricCell::Histogram(state) => Ok(HistogramHandle { id, state }),
            other => Err(mismatch(&id, MetricType::Histogram, other.metric_type())),
        }
    }

    /// The current value of one metric.
    pub fn get(&self, id: &MetricId) -> Option<MetricValue> {
        self.metrics.lock().get(id).map(|m| m.cell.value())
    }

    /// Returns `true` if the metric is registered.
    pub fn contains_metric(&self, id: &MetricId) -> bool {
        self.metrics.lock().contains_key(id)
    }

    /// The total number of registered metrics.
    pub fn metric_count(&self) -> usize {
        self.metrics.lock().len()
    }

    /// A snapshot of every metric in `namespace`, ordered by name.
    pub fn namespace_snapshot(&self, namespace: &str) -> Vec<MetricSnapshot> {
        self.metrics
            .lock()
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .map(|(id, m)| MetricSnapshot {
                id: id.to_string(),
                description: m.description.clone(),
                unit: m.unit.clone(),
                value: m.cell.value(),
            })
            .collect()
    }
}

fn mismatch(id: &MetricId, expected: MetricType, found: MetricType) -> MetricsError {
    MetricsError::TypeMismatch {
        id: id.to_string(),
        expected,
        found,
    }
}

/// Handle for counter operations.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    value: Arc<AtomicU64>,
}

impl CounterHandle {
    /// Increments the counter by 1 and returns the new total.
    pub fn increment(&self) -> u64 {
        self.increment_by(1)
    }

    /// Increments the counter by `amount` and returns the new total.
    pub fn increment_by(&self, amount: u64) -> u64 {
        self.value.fetch_add(amount, Ordering::Relaxed) + amount
    }

    /// The current total.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for gauge operations.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    id: MetricId,
    value: Arc<AtomicU64>,
}

impl GaugeHandle {
    /// Sets the gauge.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for histogram operations.
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    id: MetricId,
    state: Arc<Mutex<HistogramState>>,
}

impl HistogramHandle {
    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock();
        let bucket = state
            .bucket_bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(state.bucket_bounds.len());
        state.bucket_counts[bucket] += 1;
        state.count += 1;
        state.sum += value;
    }

    /// The number of observations so far.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_registration_and_operations() {
        let registry = MetricsRegistry::new();
        let counter = registry
            .register_counter("bundles", "cache_hits", "Cache hits")
            .unwrap();

        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment_by(5), 6);
        assert_eq!(counter.get(), 6);
        assert!(registry.contains_metric(counter.id()));
        assert_eq!(registry.metric_count(), 1);
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = MetricsRegistry::new();
        let a = registry.register_counter("bundles", "loaded", "").unwrap();
        let b = registry.register_counter("bundles", "loaded", "").unwrap();
        a.increment();
        assert_eq!(b.get(), 1);
        assert_eq!(registry.metric_count(), 1);
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let registry = MetricsRegistry::new();
        registry.register_counter("bundles", "x", "").unwrap();
        let err = registry.register_gauge("bundles", "x", "", "").unwrap_err();
        assert!(matches!(
            err,
            MetricsError::TypeMismatch {
                expected: MetricType::Gauge,
                found: MetricType::Counter,
                ..
            }
        ));
    }

    #[test]
    fn gauge_holds_last_value() {
        let registry = MetricsRegistry::new();
        let gauge = registry
            .register_gauge("cache", "occupied", "Bytes on disk", "bytes")
            .unwrap();
        gauge.set(1024.0);
        gauge.set(512.5);
        assert_eq!(gauge.get(), 512.5);
    }

    #[test]
    fn histogram_buckets_observations() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram("bundles", "fetch_time", "", "ms", vec![10.0, 1.0, 100.0])
            .unwrap();
        histogram.observe(0.5);
        histogram.observe(50.0);
        histogram.observe(500.0);

        match registry.get(histogram.id()).unwrap() {
            MetricValue::Histogram {
                count,
                bucket_bounds,
                bucket_counts,
                ..
            } => {
                assert_eq!(count, 3);
                assert_eq!(bucket_bounds, vec![1.0, 10.0, 100.0]);
                assert_eq!(bucket_counts, vec![1, 0, 1, 1]);
            }
            other => panic!("Expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn namespace_snapshot_filters() {
        let registry = MetricsRegistry::new();
        registry.register_counter("bundles", "a", "").unwrap();
        registry.register_counter("bundles", "b", "").unwrap();
        registry.register_counter("other", "c", "").unwrap();
        let snapshot = registry.namespace_snapshot("bundles");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "bundles:a");
    }
}
