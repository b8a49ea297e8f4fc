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

//! The body of a load operation: cache lookup, fetch with retries,
//! verification and commit.

use super::agent::AgentShared;
use super::events::BundleEvent;
use super::operation::{LoadOperation, LoadOutcome, LoadState};
use parcel_core::{BundleError, BundleKey, BundleResult, ContentHash, FetchError};
use parcel_telemetry::{
    CounterHandle, GaugeHandle, HistogramHandle, MetricsRegistry, MetricsResult, ScopedMetricTimer,
};
use std::sync::Arc;

/// The metric handles the loader updates.
#[derive(Debug, Clone)]
pub(crate) struct LoaderMetrics {
    pub(crate) loaded_total: CounterHandle,
    pub(crate) cache_hits: CounterHandle,
    pub(crate) cache_misses: CounterHandle,
    pub(crate) fetch_retries: CounterHandle,
    pub(crate) failures: CounterHandle,
    pub(crate) fetch_time_ms: HistogramHandle,
    pub(crate) in_flight: GaugeHandle,
    pub(crate) cache_occupied: GaugeHandle,
}

impl LoaderMetrics {
    pub(crate) fn new(registry: &MetricsRegistry) -> MetricsResult<Self> {
        Ok(Self {
            loaded_total: registry.register_counter(
                "bundles",
                "loaded_total",
                "Load operations that reached Ready",
            )?,
            cache_hits: registry.register_counter(
                "bundles",
                "cache_hits",
                "Loads served from the on-disk cache",
            )?,
            cache_misses: registry.register_counter(
                "bundles",
                "cache_misses",
                "Loads that had to fetch from the source",
            )?,
            fetch_retries: registry.register_counter(
                "bundles",
                "fetch_retries",
                "Fetch attempts beyond the first",
            )?,
            failures: registry.register_counter(
                "bundles",
                "failures",
                "Load operations that reached Failed",
            )?,
            fetch_time_ms: registry.register_histogram(
                "bundles",
                "fetch_time",
                "Duration of a single fetch attempt",
                "ms",
                vec![5.0, 20.0, 100.0, 500.0, 2_000.0, 10_000.0],
            )?,
            in_flight: registry.register_gauge(
                "bundles",
                "in_flight",
                "Load operations not yet terminal",
                "operations",
            )?,
            cache_occupied: registry.register_gauge(
                "bundles",
                "cache_occupied",
                "Bytes held by the on-disk cache",
                "bytes",
            )?,
        })
    }
}

/// Runs `operation` to completion and publishes its outcome.
///
/// The operation leaves the [`OperationRegistry`](super::OperationRegistry)
/// before its outcome is published, so a request that arrives after
/// completion never joins a finished operation.
pub(crate) async fn drive(shared: Arc<AgentShared>, operation: Arc<LoadOperation>) {
    let outcome = match shared.slots.clone().acquire_owned().await {
        Ok(_permit) => {
            shared.metrics.in_flight.set(shared.operations.len() as f64);
            run(&shared, &operation).await
        }
        Err(_) => Err(BundleError::ShutDown),
    };

    let key = operation.key().clone();
    match &outcome {
        Ok(_) => {
            shared.metrics.loaded_total.increment();
        }
        Err(error) => {
            if !operation.state().is_terminal() {
                operation.transition(LoadState::Failed);
            }
            shared.metrics.failures.increment();
            shared.error_log.append(key.name.clone(), error.to_string());
            log::error!("Loading {} failed: {}", key, error);
            shared.emit(BundleEvent::Failed {
                key: key.clone(),
                error: error.clone(),
            });
        }
    }

    shared.operations.remove(&operation);
    shared.metrics.in_flight.set(shared.operations.len() as f64);
    operation.complete(outcome);
}

async fn run(shared: &Arc<AgentShared>, operation: &LoadOperation) -> LoadOutcome {
    let key = operation.key();
    operation.transition(LoadState::ConsultingCache);

    if operation.verifies() {
        if let Some(bytes) = lookup(shared, key).await {
            shared.metrics.cache_hits.increment();
            log::debug!("Cache hit for {}", key);
            operation.transition(LoadState::Ready);
            shared.emit(BundleEvent::Completed {
                key: key.clone(),
                from_cache: true,
            });
            return Ok(Arc::from(bytes));
        }
        shared.metrics.cache_misses.increment();
        log::debug!("Cache miss for {}", key);
    }

    let payload: Arc<[u8]> = Arc::from(fetch_with_retries(shared, operation).await?);

    if operation.verifies() {
        operation.transition(LoadState::Verifying);
        verify(operation, &payload)?;
        commit(shared, key, payload.clone()).await;
    }

    operation.transition(LoadState::Ready);
    shared.emit(BundleEvent::Completed {
        key: key.clone(),
        from_cache: false,
    });
    Ok(payload)
}

/// Reads a cached payload on the blocking pool.
async fn lookup(shared: &Arc<AgentShared>, key: &BundleKey) -> Option<Vec<u8>> {
    let cache_owner = Arc::clone(shared);
    let wanted = key.clone();
    tokio::task::spawn_blocking(move || cache_owner.cache.get(&wanted.name, &wanted.hash))
        .await
        .unwrap_or_else(|err| {
            log::warn!("Cache lookup for {} did not complete: {}", key, err);
            None
        })
}

async fn fetch_with_retries(shared: &AgentShared, operation: &LoadOperation) -> BundleResult<Vec<u8>> {
    let key = operation.key();
    let attempts = if shared.source.mode().retries() {
        shared.config.max_fetch_attempts.max(1)
    } else {
        1
    };

    let mut last_error = FetchError::transport("no attempt was made");
    for attempt in 1..=attempts {
        operation.transition(LoadState::Fetching { attempt });
        let fetched = {
            let _timer = ScopedMetricTimer::new(&shared.metrics.fetch_time_ms);
            tokio::time::timeout(
                shared.config.fetch_timeout(),
                shared.source.fetch(&key.name, operation.version()),
            )
            .await
        };

        match fetched {
            Ok(Ok(bytes)) => return Ok(bytes),
            Ok(Err(error)) => last_error = error,
            Err(_) => {
                last_error = FetchError::timeout(format!(
                    "no response within {} ms",
                    shared.config.fetch_timeout_ms
                ))
            }
        }

        if attempt < attempts {
            let delay = shared.config.backoff(attempt);
            shared.metrics.fetch_retries.increment();
            log::warn!(
                "Fetching {} failed (attempt {}/{}): {}; retrying in {:?}",
                key,
                attempt,
                attempts,
                last_error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(BundleError::FetchError {
        bundle: key.name.clone(),
        attempts,
        reason: last_error.to_string(),
    })
}

fn verify(operation: &LoadOperation, bytes: &[u8]) -> BundleResult<()> {
    let actual = ContentHash::of(bytes);
    let key = operation.key();
    if actual != key.hash {
        return Err(BundleError::HashMismatch {
            bundle: key.name.clone(),
            expected: key.hash.clone(),
            actual,
        });
    }
    Ok(())
}

/// Commits verified bytes to the cache and trims it back under quota, on the
/// blocking pool. A failed write only costs a future refetch, so it does not
/// fail the load.
async fn commit(shared: &Arc<AgentShared>, key: &BundleKey, payload: Arc<[u8]>) {
    let cache_owner = Arc::clone(shared);
    let committed = key.clone();
    let task = tokio::task::spawn_blocking(move || {
        let shared = cache_owner;
        if let Err(err) = shared.cache.put(&committed.name, &committed.hash, &payload) {
            log::warn!("Could not cache {}: {}", committed, err);
            return;
        }
        let evicted = shared
            .cache
            .trim_to_quota(|name| shared.registry.is_in_use(name), Some(&committed.name));
        if !evicted.is_empty() {
            log::debug!("Cache trim evicted {} bundle(s)", evicted.len());
        }
        shared
            .metrics
            .cache_occupied
            .set(shared.cache.space_occupied() as f64);
    });
    if let Err(err) = task.await {
        log::warn!("Committing {} to the cache did not complete: {}", key, err);
    }
}
