//! Two-tier cache behavior: TTL, versioning, invalidation, degradation.

use ai_gatekit::cache::{
    CacheBackend, CacheConfig, CacheStore, MemoryBackend, NullBackend, Params,
};
use ai_gatekit::clock::MonotonicClock;
use ai_gatekit::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

fn params(prompt: &str) -> Params {
    let mut p = Params::new();
    p.insert("prompt".to_string(), serde_json::Value::from(prompt));
    p
}

fn store() -> CacheStore {
    CacheStore::new(CacheConfig::new()).unwrap()
}

/// Backend that fails every operation, for degraded-mode tests.
struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<()> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    async fn remove(&self, _: &str) -> Result<bool> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    async fn keys(&self) -> Result<Vec<String>> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    async fn len(&self) -> Result<usize> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    async fn clear(&self) -> Result<()> {
        Err(ai_gatekit::Error::backend_unavailable("down", "refused"))
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

#[tokio::test]
async fn set_then_get_round_trips_until_ttl() {
    let store = store();
    let p = params("hello");
    store
        .set("chat", &p, &"answer", Some(Duration::from_millis(300)))
        .await
        .unwrap();
    assert_eq!(
        store.get::<String>("chat", &p).await.as_deref(),
        Some("answer")
    );
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.get::<String>("chat", &p).await.is_none());
}

#[tokio::test]
async fn version_bump_orphans_prior_entries() {
    let store = store();
    let p = params("hello");
    store.set("chat", &p, &"old answer", None).await.unwrap();
    assert!(store.get::<String>("chat", &p).await.is_some());

    store.update_version("v2").unwrap();
    // Same params never resolve to the old key under the new version.
    assert!(store.get::<String>("chat", &p).await.is_none());

    store.set("chat", &p, &"new answer", None).await.unwrap();
    assert_eq!(
        store.get::<String>("chat", &p).await.as_deref(),
        Some("new answer")
    );

    // Rolling back does not resurrect writes made under v2.
    store.update_version("v1").unwrap();
    assert_eq!(
        store.get::<String>("chat", &p).await.as_deref(),
        Some("old answer")
    );
}

#[tokio::test]
async fn delete_pattern_removes_exactly_the_matching_set() {
    let store = store();
    store.set("a1", &params("x"), &1, None).await.unwrap();
    store.set("a2", &params("x"), &2, None).await.unwrap();
    store.set("b1", &params("x"), &3, None).await.unwrap();

    let removed = store.delete_pattern("a*").await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.get::<i32>("a1", &params("x")).await.is_none());
    assert!(store.get::<i32>("a2", &params("x")).await.is_none());
    assert_eq!(store.get::<i32>("b1", &params("x")).await, Some(3));
}

#[tokio::test]
async fn invalidate_namespace_counts_and_clears() {
    let store = store();
    for prompt in ["one", "two", "three"] {
        store
            .set("summaries", &params(prompt), &prompt, None)
            .await
            .unwrap();
    }
    store.set("other", &params("keep"), &"kept", None).await.unwrap();

    assert_eq!(store.invalidate_namespace("summaries").await.unwrap(), 3);
    for prompt in ["one", "two", "three"] {
        assert!(store.get::<String>("summaries", &params(prompt)).await.is_none());
    }
    assert!(store.get::<String>("other", &params("keep")).await.is_some());
}

#[tokio::test]
async fn malformed_patterns_are_rejected() {
    let store = store();
    assert!(store.delete_pattern("").await.is_err());
    assert!(store.delete_pattern("ns:[oops]").await.is_err());
    assert!(store.invalidate_namespace("bad*ns").await.is_err());
    assert!(store.invalidate_namespace("").await.is_err());
}

#[tokio::test]
async fn shared_hit_is_promoted_into_the_fast_tier() {
    let shared: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(Arc::new(MonotonicClock)));
    let writer = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(shared.clone());
    let reader = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(shared.clone());

    let p = params("popular");
    writer.set("chat", &p, &"answer", None).await.unwrap();

    // The reader's fast tier is empty; the hit comes from the shared tier.
    assert_eq!(
        reader.get::<String>("chat", &p).await.as_deref(),
        Some("answer")
    );
    assert_eq!(reader.get_stats().entry_count, 1, "expected promotion");
}

#[tokio::test]
async fn pattern_delete_covers_the_shared_tier() {
    let shared: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(Arc::new(MonotonicClock)));
    let writer = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(shared.clone());
    let reader = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(shared.clone());

    let p = params("popular");
    writer.set("chat", &p, &"answer", None).await.unwrap();

    // The reader never saw the key locally, yet the shared copy must go.
    assert_eq!(reader.invalidate_namespace("chat").await.unwrap(), 1);
    assert!(reader.get::<String>("chat", &p).await.is_none());
    // The writer's own fast tier is untouched: instances behind a load
    // balancer hold independent local state.
    assert!(writer.get::<String>("chat", &p).await.is_some());
    assert_eq!(writer.invalidate_namespace("chat").await.unwrap(), 1);
    assert!(writer.get::<String>("chat", &p).await.is_none());
}

#[tokio::test]
async fn down_shared_tier_degrades_to_fast_tier_only() {
    let store = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(Arc::new(DownBackend));

    let p = params("hello");
    // Writes succeed locally despite the dead shared tier.
    store.set("chat", &p, &"answer", None).await.unwrap();
    assert_eq!(
        store.get::<String>("chat", &p).await.as_deref(),
        Some("answer")
    );
    // Pattern deletes still report the fast-tier removals.
    assert_eq!(store.delete_pattern("chat:*").await.unwrap(), 1);

    let health = store.health_check().await;
    assert!(!health.backend_reachable);
}

#[tokio::test]
async fn null_backend_behaves_as_local_only() {
    let store = CacheStore::new(CacheConfig::new())
        .unwrap()
        .with_shared_backend(Arc::new(NullBackend::new()));
    let p = params("hello");
    store.set("chat", &p, &"answer", None).await.unwrap();
    assert_eq!(
        store.get::<String>("chat", &p).await.as_deref(),
        Some("answer")
    );
    assert!(store.health_check().await.backend_reachable);
}

#[tokio::test]
async fn stats_track_hits_misses_and_entries() {
    let store = store();
    let p = params("hello");
    assert!(store.get::<String>("chat", &p).await.is_none());
    store.set("chat", &p, &"answer", None).await.unwrap();
    assert!(store.get::<String>("chat", &p).await.is_some());

    let stats = store.get_stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.entry_count, 1);
    assert!((stats.hit_rate_percent - 50.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn sweeper_prunes_and_shuts_down_cleanly() {
    let store = Arc::new(
        CacheStore::new(
            CacheConfig::new()
                .with_max_entries(4)
                .with_cleanup_interval(Duration::from_millis(50))
                .with_default_ttl(Duration::from_secs(600)),
        )
        .unwrap(),
    );
    store.start_sweeper();

    for i in 0..10 {
        store
            .set("bulk", &params(&format!("p{}", i)), &i, None)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.get_stats().entry_count <= 4);
    assert!(store.health_check().await.cleanup_task_alive);

    store.shutdown().await;
    assert!(!store.health_check().await.cleanup_task_alive);
}

#[tokio::test(flavor = "multi_thread")]
async fn sweeper_reclaims_expired_entries_without_traffic() {
    let store = Arc::new(
        CacheStore::new(
            CacheConfig::new()
                .with_cleanup_interval(Duration::from_millis(50))
                .with_default_ttl(Duration::from_millis(100)),
        )
        .unwrap(),
    );
    store.start_sweeper();

    for i in 0..5 {
        store
            .set("ephemeral", &params(&format!("p{}", i)), &i, None)
            .await
            .unwrap();
    }
    assert_eq!(store.get_stats().entry_count, 5);
    // No gets happen; only the sweeper can reclaim these.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get_stats().entry_count, 0);

    store.shutdown().await;
}

#[tokio::test]
async fn oversized_entries_are_skipped_not_stored() {
    let store = CacheStore::new(CacheConfig::new().with_max_entry_size(16)).unwrap();
    let p = params("big");
    store
        .set("chat", &p, &"x".repeat(64), None)
        .await
        .unwrap();
    assert!(store.get::<String>("chat", &p).await.is_none());
}
