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

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parcel_agents::{BundleAgent, BundleEvent, LoadState, LoaderConfig};
use parcel_core::{
    BundleError, BundleName, BundleSource, ContentHash, ContentVersion, FetchError,
    ManifestDocument, ManifestRecord, SourceMode,
};
use parcel_data::UnloadPolicy;
use parcel_io::{BundleCache, PatchStore};
use parcel_telemetry::{MetricId, MetricValue, MetricsRegistry};
use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};

// --- Test Setup: an in-memory source that counts fetches and injects faults ---

#[derive(Debug)]
struct MockSource {
    mode: SourceMode,
    manifests: Mutex<HashMap<String, Vec<u8>>>,
    payloads: Mutex<HashMap<(String, String), Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockSource {
    fn new(mode: SourceMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            manifests: Mutex::new(HashMap::new()),
            payloads: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    /// Publishes a version: `(name, payload, dependencies)` per bundle.
    fn publish(&self, version: &str, bundles: &[(&str, &[u8], &[&str])]) {
        let document = ManifestDocument {
            version: Some(version.into()),
            bundles: bundles
                .iter()
                .map(|(name, payload, deps)| ManifestRecord {
                    name: (*name).into(),
                    hash: ContentHash::of(payload),
                    dependencies: deps.iter().map(|d| BundleName::from(*d)).collect(),
                })
                .collect(),
        };
        self.manifests
            .lock()
            .insert(version.to_string(), serde_json::to_vec(&document).unwrap());
        let mut payloads = self.payloads.lock();
        for (name, payload, _) in bundles {
            payloads.insert((version.to_string(), name.to_string()), payload.to_vec());
        }
    }

    fn tamper(&self, version: &str, name: &str, bytes: &[u8]) {
        self.payloads
            .lock()
            .insert((version.to_string(), name.to_string()), bytes.to_vec());
    }

    /// Makes the next `times` fetches of `name` fail. `u32::MAX` never recovers.
    fn fail(&self, name: &str, times: u32) {
        self.failures.lock().insert(name.to_string(), times);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// The most bundle fetches that were ever running at the same time.
    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn fetch_count(&self, name: &str) -> usize {
        self.fetches.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BundleSource for MockSource {
    fn mode(&self) -> SourceMode {
        self.mode
    }

    async fn fetch_manifest(&self, version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        self.manifests
            .lock()
            .get(version.as_str())
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("no manifest {version}")))
    }

    async fn fetch(
        &self,
        name: &BundleName,
        version: &ContentVersion,
    ) -> Result<Vec<u8>, FetchError> {
        *self.fetches.lock().entry(name.to_string()).or_default() += 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(name.as_str()) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(FetchError::transport(format!("{name} is unreachable")));
                }
            }
        }

        self.payloads
            .lock()
            .get(&(version.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::not_found(name.to_string()))
    }
}

struct Fixture {
    dir: TempDir,
    source: Arc<MockSource>,
    metrics: MetricsRegistry,
    agent: BundleAgent,
}

fn quick_config() -> LoaderConfig {
    LoaderConfig {
        max_fetch_attempts: 3,
        fetch_timeout_ms: 2_000,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        ..Default::default()
    }
}

fn agent_over(
    dir: &Path,
    source: Arc<MockSource>,
    config: LoaderConfig,
    quota: u64,
    metrics: &MetricsRegistry,
) -> BundleAgent {
    BundleAgent::new(
        config,
        source,
        BundleCache::open(dir.join("cache"), quota).unwrap(),
        PatchStore::new(dir.join("history.json")),
        metrics,
    )
    .unwrap()
}

fn fixture(mode: SourceMode, config: LoaderConfig, quota: u64) -> Fixture {
    let dir = tempdir().unwrap();
    let source = MockSource::new(mode);
    let metrics = MetricsRegistry::new();
    let agent = agent_over(dir.path(), source.clone(), config, quota, &metrics);
    Fixture {
        dir,
        source,
        metrics,
        agent,
    }
}

const ABC: &[(&str, &[u8], &[&str])] = &[
    ("A", b"payload A", &[]),
    ("B", b"payload B", &["A"]),
    ("C", b"payload C", &["B"]),
];

const INDEPENDENT: &[(&str, &[u8], &[&str])] = &[
    ("X", b"payload X", &[]),
    ("Y", b"payload Y", &[]),
    ("Z", b"payload Z", &[]),
];

/// Waits until every background operation has finished.
async fn settle(agent: &BundleAgent) {
    for operation in agent.operations().operations() {
        let _ = operation.wait().await;
    }
}

fn counter(metrics: &MetricsRegistry, name: &str) -> u64 {
    match metrics.get(&MetricId::new("bundles", name)) {
        Some(MetricValue::Counter { value }) => value,
        other => panic!("Expected counter bundles:{name}, got {other:?}"),
    }
}

fn key_of(agent: &BundleAgent, name: &str) -> parcel_core::BundleKey {
    let manifest = agent.active_manifest().unwrap();
    let name = BundleName::from(name);
    let hash = manifest.hash_of(&name).unwrap().clone();
    parcel_core::BundleKey::new(name, hash)
}

// --- Loading ---

#[tokio::test]
async fn request_loads_dependencies_first() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let handle = fx.agent.request_bundle("C").await?;

    let order: Vec<_> = handle.load_order().iter().map(|n| n.to_string()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    assert_eq!(&*handle, b"payload C");
    for name in ["A", "B", "C"] {
        assert_eq!(fx.agent.registry().refcount(&key_of(&fx.agent, name)), 1);
        assert_eq!(fx.source.fetch_count(name), 1);
    }
    assert_eq!(counter(&fx.metrics, "loaded_total"), 3);
    assert_eq!(counter(&fx.metrics, "cache_misses"), 3);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.set_delay(Duration::from_millis(50));
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let (first, second) = tokio::join!(fx.agent.request_bundle("A"), fx.agent.request_bundle("A"));
    let (first, second) = (first?, second?);

    assert_eq!(fx.source.fetch_count("A"), 1);
    assert_eq!(first.hash(), second.hash());
    assert_ne!(first.lease().id(), second.lease().id());
    assert_eq!(fx.agent.registry().refcount(&key_of(&fx.agent, "A")), 2);
    Ok(())
}

#[tokio::test]
async fn loads_beyond_the_slot_limit_wait_queued() -> Result<()> {
    let config = LoaderConfig {
        max_concurrent_loads: 1,
        ..quick_config()
    };
    let fx = fixture(SourceMode::Remote, config, 1 << 20);
    fx.source.publish("v1", INDEPENDENT);
    fx.source.set_delay(Duration::from_millis(100));
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let requests: Vec<_> = ["X", "Y", "Z"]
        .into_iter()
        .map(|name| {
            let agent = fx.agent.clone();
            tokio::spawn(async move { agent.request_bundle(name).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let in_progress = fx.agent.diagnostics().in_progress;
    assert_eq!(in_progress.len(), 3);
    let queued = in_progress
        .iter()
        .filter(|op| op.state == LoadState::Queued)
        .count();
    assert_eq!(queued, 2);

    for request in requests {
        request.await??;
    }
    assert_eq!(fx.source.peak_in_flight(), 1);
    for name in ["X", "Y", "Z"] {
        assert_eq!(fx.source.fetch_count(name), 1);
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_failure() -> Result<()> {
    let fx = fixture(SourceMode::LocalServer, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.set_delay(Duration::from_millis(50));
    fx.source.fail("A", u32::MAX);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let (first, second) = tokio::join!(fx.agent.request_bundle("A"), fx.agent.request_bundle("A"));

    let first = first.unwrap_err();
    assert_eq!(Err::<(), _>(first.clone()), second.map(|_| ()));
    assert!(matches!(first, BundleError::FetchError { attempts: 1, .. }));
    assert_eq!(fx.source.fetch_count("A"), 1);
    assert_eq!(fx.agent.error_log().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_dependency_fails_the_request_but_not_its_siblings() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.fail("A", u32::MAX);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let err = fx.agent.request_bundle("C").await.unwrap_err();
    assert!(matches!(
        &err,
        BundleError::FetchError { bundle, attempts: 3, .. } if bundle.as_str() == "A"
    ));
    settle(&fx.agent).await;

    // Nothing stays referenced, but B and C were verified and cached.
    assert_eq!(fx.agent.registry().in_use_count(), 0);
    assert!(fx.agent.cache().contains_valid(&"B".into(), &ContentHash::of(b"payload B")));

    // A later request for A retries independently against the same cache state.
    fx.source.fail("A", 0);
    let a = fx.agent.request_bundle("A").await?;
    assert_eq!(&*a, b"payload A");
    assert_eq!(fx.source.fetch_count("A"), 4);

    let c = fx.agent.request_bundle("C").await?;
    assert_eq!(&*c, b"payload C");
    assert_eq!(fx.source.fetch_count("B"), 1);
    assert_eq!(fx.source.fetch_count("C"), 1);
    Ok(())
}

// --- Retries, timeouts, verification ---

#[tokio::test]
async fn remote_fetch_is_retried_with_backoff() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.fail("A", 2);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let handle = fx.agent.request_bundle("A").await?;
    assert_eq!(&*handle, b"payload A");
    assert_eq!(fx.source.fetch_count("A"), 3);
    assert_eq!(counter(&fx.metrics, "fetch_retries"), 2);
    Ok(())
}

#[tokio::test]
async fn local_server_fetch_is_not_retried() -> Result<()> {
    let fx = fixture(SourceMode::LocalServer, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.fail("A", 1);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let err = fx.agent.request_bundle("A").await.unwrap_err();
    assert!(matches!(err, BundleError::FetchError { attempts: 1, .. }));
    assert_eq!(fx.source.fetch_count("A"), 1);
    Ok(())
}

#[tokio::test]
async fn timeouts_count_toward_the_retry_budget() -> Result<()> {
    let config = LoaderConfig {
        max_fetch_attempts: 2,
        fetch_timeout_ms: 20,
        ..quick_config()
    };
    let fx = fixture(SourceMode::Remote, config, 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.set_delay(Duration::from_millis(500));
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let err = fx.agent.request_bundle("A").await.unwrap_err();
    match err {
        BundleError::FetchError {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("Timeout"), "unexpected reason: {reason}");
        }
        other => panic!("Expected a fetch error, got {other:?}"),
    }
    assert_eq!(fx.source.fetch_count("A"), 2);
    Ok(())
}

#[tokio::test]
async fn hash_mismatch_is_reported_not_retried() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source.tamper("v1", "A", b"tampered");
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let err = fx.agent.request_bundle("A").await.unwrap_err();
    assert!(matches!(err, BundleError::HashMismatch { .. }));
    assert_eq!(fx.source.fetch_count("A"), 1);
    assert!(fx.agent.cache().is_empty());
    assert_eq!(fx.agent.registry().loaded_count(), 0);
    assert_eq!(fx.agent.error_log().entries()[0].bundle.as_str(), "A");
    Ok(())
}

// --- Cache ---

#[tokio::test]
async fn cached_bundle_is_not_fetched_again() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let handle = fx.agent.request_bundle("A").await?;
    fx.agent.release_bundle(&handle)?;
    assert_eq!(fx.agent.update().len(), 1);
    assert_eq!(fx.agent.registry().loaded_count(), 0);

    let again = fx.agent.request_bundle("A").await?;
    assert_eq!(&*again, b"payload A");
    assert_eq!(fx.source.fetch_count("A"), 1);
    assert_eq!(counter(&fx.metrics, "cache_hits"), 1);

    // A fresh agent over the same directory trusts the committed sidecars.
    let metrics = MetricsRegistry::new();
    let restarted = agent_over(fx.dir.path(), fx.source.clone(), quick_config(), 1 << 20, &metrics);
    assert_eq!(restarted.start(None).await?, Some("v1".into()));
    restarted.request_bundle("A").await?;
    assert_eq!(fx.source.fetch_count("A"), 1);
    Ok(())
}

#[tokio::test]
async fn stale_cache_entry_triggers_a_fresh_fetch() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", &[("A", b"old", &[])]);
    fx.source.publish("v2", &[("A", b"new", &[])]);

    fx.agent.deploy_patch("v1".into(), "old content").await?;
    let old = fx.agent.request_bundle("A").await?;
    fx.agent.release_bundle(&old)?;

    fx.agent.switch_patch("v2").await?;
    let new = fx.agent.request_bundle("A").await?;

    assert_eq!(&*new, b"new");
    assert_eq!(fx.source.fetch_count("A"), 2);
    assert!(!fx.agent.cache().contains_valid(&"A".into(), &ContentHash::of(b"old")));
    assert!(fx.agent.cache().contains_valid(&"A".into(), &ContentHash::of(b"new")));
    Ok(())
}

#[tokio::test]
async fn eviction_never_removes_held_bundles() -> Result<()> {
    // Room for exactly three four-byte payloads.
    let fx = fixture(SourceMode::Remote, quick_config(), 12);
    fx.source.publish(
        "v1",
        &[("a", b"aaaa", &[]), ("b", b"bbbb", &[]), ("c", b"cccc", &[]), ("d", b"dddd", &[])],
    );
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let held = [
        fx.agent.request_bundle("a").await?,
        fx.agent.request_bundle("b").await?,
        fx.agent.request_bundle("c").await?,
    ];
    let extra = fx.agent.request_bundle("d").await?;
    fx.agent.release_bundle(&extra)?;

    for (handle, name) in held.iter().zip(["a", "b", "c"]) {
        assert!(fx.agent.cache().contains_valid(&name.into(), handle.hash()));
        let again = fx.agent.request_bundle(name).await?;
        assert_eq!(&*again, &**handle);
        assert_eq!(fx.source.fetch_count(name), 1);
    }

    // Once "d" is unreferenced the next tick brings the cache back under quota.
    fx.agent.update();
    assert!(fx.agent.cache().space_occupied() <= 12);
    assert!(!fx.agent.cache().contains_valid(&"d".into(), &ContentHash::of(b"dddd")));
    Ok(())
}

// --- Release ---

#[tokio::test]
async fn releasing_a_handle_twice_is_an_error() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let first = fx.agent.request_bundle("B").await?;
    let second = fx.agent.request_bundle("B").await?;
    let copy = first.clone();

    fx.agent.release_bundle(&first)?;
    let err = fx.agent.release_bundle(&copy).unwrap_err();
    assert!(matches!(err, BundleError::DoubleRelease { .. }));

    // The distinct handle still holds its own share.
    assert_eq!(fx.agent.registry().refcount(&key_of(&fx.agent, "B")), 1);
    assert_eq!(fx.agent.registry().refcount(&key_of(&fx.agent, "A")), 1);
    fx.agent.release_bundle(&second)?;
    assert_eq!(fx.agent.registry().in_use_count(), 0);
    Ok(())
}

#[tokio::test]
async fn immediate_policy_unloads_on_release() -> Result<()> {
    let config = LoaderConfig {
        unload_policy: UnloadPolicy::Immediate,
        ..quick_config()
    };
    let fx = fixture(SourceMode::Remote, config, 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let handle = fx.agent.request_bundle("C").await?;
    fx.agent.release_bundle(&handle)?;
    assert_eq!(fx.agent.registry().loaded_count(), 0);
    Ok(())
}

#[tokio::test]
async fn abandoned_request_leaves_no_references() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;
    let a = fx.agent.request_bundle("A").await?;

    fx.source.set_delay(Duration::from_millis(200));
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), fx.agent.request_bundle("C")).await;
    assert!(abandoned.is_err());

    // B and C keep loading for later requests, but nobody waits on them.
    let in_progress = fx.agent.diagnostics().in_progress;
    assert_eq!(in_progress.len(), 2);
    assert!(in_progress.iter().all(|op| op.waiters == 0));
    settle(&fx.agent).await;

    // Only the explicit handle on A remains; the abandoned share was rolled back.
    assert_eq!(fx.agent.registry().refcount(a.lease().key()), 1);
    assert_eq!(fx.agent.registry().in_use_count(), 1);
    Ok(())
}

// --- Patches ---

#[tokio::test]
async fn switch_patch_round_trips() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", &[("A", b"first", &[])]);
    fx.source.publish("v2", &[("A", b"second", &[])]);

    fx.agent.deploy_patch("v1".into(), "launch").await?;
    let before = fx.agent.resolve(&"A".into())?;
    let hash_before = fx.agent.active_manifest()?.hash_of(&"A".into()).cloned();

    fx.agent.deploy_patch("v2".into(), "hotfix").await?;
    assert_ne!(fx.agent.active_manifest()?.hash_of(&"A".into()).cloned(), hash_before);

    fx.agent.switch_patch("v1").await?;
    assert_eq!(fx.agent.resolve(&"A".into())?, before);
    assert_eq!(fx.agent.active_manifest()?.hash_of(&"A".into()).cloned(), hash_before);
    let handle = fx.agent.request_bundle("A").await?;
    assert_eq!(&*handle, b"first");

    let history = fx.agent.patch_history();
    let versions: Vec<_> = history.list().iter().map(|r| r.version.to_string()).collect();
    assert_eq!(versions, vec!["v1", "v2", "v1"]);
    assert!(history.list()[2].note.contains("launch"));

    let persisted = PatchStore::new(fx.dir.path().join("history.json")).load()?;
    assert_eq!(persisted, history);
    Ok(())
}

#[tokio::test]
async fn invalid_manifest_leaves_history_untouched() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.source
        .publish("cyclic", &[("x", b"x", &["y"]), ("y", b"y", &["x"])]);
    fx.agent.deploy_patch("v1".into(), "first").await?;

    let err = fx.agent.switch_patch("cyclic").await.unwrap_err();
    assert!(matches!(err, BundleError::CyclicDependency { .. }));
    let err = fx.agent.switch_patch("missing").await.unwrap_err();
    assert!(matches!(err, BundleError::ManifestUnavailable { .. }));

    assert_eq!(fx.agent.patch_history().len(), 1);
    assert_eq!(fx.agent.active_version(), Some("v1".into()));
    Ok(())
}

// --- Modes, lifecycle, diagnostics ---

#[tokio::test]
async fn simulation_mode_skips_cache_and_verification() -> Result<()> {
    let fx = fixture(SourceMode::Simulated, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    // Content edited in place without rebuilding the manifest.
    fx.source.tamper("v1", "A", b"edited locally");
    fx.agent.deploy_patch("v1".into(), "local").await?;

    let handle = fx.agent.request_bundle("A").await?;
    assert_eq!(&*handle, b"edited locally");
    assert!(fx.agent.cache().is_empty());
    assert_eq!(counter(&fx.metrics, "cache_misses"), 0);
    assert_eq!(counter(&fx.metrics, "cache_hits"), 0);
    Ok(())
}

#[tokio::test]
async fn requests_fail_cleanly_without_an_active_version() {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    assert_eq!(fx.agent.start(None).await, Ok(None));
    let err = fx.agent.request_bundle("A").await.unwrap_err();
    assert!(matches!(err, BundleError::ManifestUnavailable { .. }));
}

#[tokio::test]
async fn unknown_bundle_is_reported() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.start(Some("v1".into())).await?;
    assert_eq!(fx.agent.patch_history().len(), 1);

    let err = fx.agent.request_bundle("Z").await.unwrap_err();
    assert_eq!(err, BundleError::UnknownBundle("Z".into()));
    assert_eq!(fx.agent.error_log().len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_refuses_new_requests() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;
    let handle = fx.agent.request_bundle("A").await?;
    fx.agent.release_bundle(&handle)?;

    fx.agent.shutdown().await;
    assert_eq!(fx.agent.registry().loaded_count(), 0);
    assert_eq!(fx.agent.request_bundle("A").await.unwrap_err(), BundleError::ShutDown);
    Ok(())
}

#[tokio::test]
async fn diagnostics_reflect_loader_state() -> Result<()> {
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    fx.source.publish("v1", ABC);
    fx.agent.deploy_patch("v1".into(), "first").await?;
    let _handle = fx.agent.request_bundle("B").await?;

    let diagnostics = fx.agent.diagnostics();
    assert_eq!(diagnostics.source_mode, SourceMode::Remote);
    assert_eq!(diagnostics.active_version, Some("v1".into()));
    assert_eq!(diagnostics.loaded_count, 2);
    assert_eq!(diagnostics.cached_bundles, 2);
    assert_eq!(diagnostics.manifest_bundles, 3);
    assert!(diagnostics.in_progress.is_empty());
    assert_eq!(diagnostics.patch_history.len(), 1);
    assert_eq!(diagnostics.dependents[&BundleName::from("A")], vec![BundleName::from("B")]);
    assert_eq!(diagnostics.cache_occupied, fx.agent.cache().space_occupied());

    let json = serde_json::to_value(&diagnostics)?;
    assert_eq!(json["active_version"], "v1");
    assert!(diagnostics.summary().contains("cached 2/3"));
    Ok(())
}

#[tokio::test]
async fn events_are_sent_for_every_operation() -> Result<()> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let fx = fixture(SourceMode::Remote, quick_config(), 1 << 20);
    let agent = fx.agent.clone().with_event_sender(sender);
    fx.source.publish("v1", ABC);
    agent.deploy_patch("v1".into(), "first").await?;

    agent.request_bundle("A").await?;
    let events: Vec<_> = receiver.try_iter().collect();
    assert!(matches!(&events[0], BundleEvent::Started { key } if key.name.as_str() == "A"));
    assert!(matches!(&events[1], BundleEvent::Completed { from_cache: false, .. }));
    Ok(())
}
