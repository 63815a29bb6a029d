//! Two-tier cache store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, MemoryTier};
use super::key::{identifier_params, KeyGenerator, Params};
use crate::clock::{MonotonicClock, TimeSource};
use crate::stats::StatsRecorder;
use crate::{Error, ErrorContext, Result};

static NAMESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static pattern"));
static GLOB_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-*?]+$").expect("static pattern"));

/// Cache behavior and limits. Builder-constructed, immutable afterwards.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one.
    pub default_ttl: Duration,
    /// Fast-tier entry cap enforced by the sweeper's LRU pass.
    pub max_entries: usize,
    /// Background sweep interval.
    pub cleanup_interval: Duration,
    /// Upper bound on entries removed per lock acquisition during sweeps.
    pub sweep_batch: usize,
    /// Bound on any single shared-tier operation.
    pub shared_timeout: Duration,
    /// Content-version tag folded into every derived key.
    pub version: String,
    /// Entries serialized above this size are skipped, not stored.
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
            sweep_batch: 64,
            shared_timeout: Duration::from_millis(250),
            version: "v1".to_string(),
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_sweep_batch(mut self, batch: usize) -> Self {
        self.sweep_batch = batch;
        self
    }

    pub fn with_shared_timeout(mut self, timeout: Duration) -> Self {
        self.shared_timeout = timeout;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_max_entry_size(mut self, size: usize) -> Self {
        self.max_entry_size = size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::configuration_with_context(
                "fast tier must allow at least one entry",
                ErrorContext::new()
                    .with_source("cache_config")
                    .with_details("max_entries=0"),
            ));
        }
        if self.version.is_empty() {
            return Err(Error::configuration_with_context(
                "content version tag must be non-empty",
                ErrorContext::new().with_source("cache_config"),
            ));
        }
        Ok(())
    }
}

/// Running cache aggregates, O(1) per observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub total_requests: u64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health probe result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    /// Shared-tier reachability; `true` for local-only operation.
    pub backend_reachable: bool,
    /// `true` while a started sweeper task is still running.
    pub cleanup_task_alive: bool,
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    latency_us_total: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            latency_us_total: AtomicU64::new(0),
        }
    }
}

struct SweeperHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Two-tier key/value store with versioned keys, TTL expiry, size-bounded
/// LRU eviction, and pattern/namespace invalidation.
///
/// The fast tier is always present; a shared durable tier is optional and
/// accessed only under a bounded timeout, so the admission-critical path
/// never waits on a slow external dependency. Shared-tier faults degrade to
/// misses (`get`) or dropped writes (`set`) and are logged once per outage.
pub struct CacheStore {
    config: CacheConfig,
    keygen: KeyGenerator,
    version: ArcSwap<String>,
    fast: MemoryTier,
    shared: Option<Arc<dyn CacheBackend>>,
    outage_logged: AtomicBool,
    stats: AtomicStats,
    recorder: Option<Arc<StatsRecorder>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        config.validate()?;
        let version = ArcSwap::from_pointee(config.version.clone());
        Ok(Self {
            config,
            keygen: KeyGenerator::new(),
            version,
            fast: MemoryTier::new(clock),
            shared: None,
            outage_logged: AtomicBool::new(false),
            stats: AtomicStats::new(),
            recorder: None,
            sweeper: Mutex::new(None),
        })
    }

    /// Attach a shared durable tier.
    pub fn with_shared_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.shared = Some(backend);
        self
    }

    /// Attach a recorder that observes every get and set.
    pub fn with_recorder(mut self, recorder: Arc<StatsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn current_version(&self) -> String {
        self.version.load().as_ref().clone()
    }

    /// Swap the content-version tag. O(1); prior entries stay resident but
    /// unreachable until TTL or size pressure reclaims them.
    pub fn update_version(&self, version: impl Into<String>) -> Result<()> {
        let version = version.into();
        if version.is_empty() {
            return Err(Error::configuration_with_context(
                "content version tag must be non-empty",
                ErrorContext::new().with_source("cache_store"),
            ));
        }
        info!(target: "ai_gatekit::cache", %version, "content version updated");
        self.version.store(Arc::new(version));
        Ok(())
    }

    fn derive_key(&self, namespace: &str, params: &Params) -> String {
        let version = self.version.load();
        self.keygen
            .derive(namespace, version.as_str(), params)
            .to_string()
    }

    /// Lookup. Fast tier first; on miss the shared tier is consulted under
    /// the bounded timeout and a hit is promoted into the fast tier. Expired
    /// entries are discarded lazily. Never errors: backend faults and corrupt
    /// payloads all degrade to a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, params: &Params) -> Option<T> {
        let started = Instant::now();
        let key = self.derive_key(namespace, params);

        if let Some(data) = self.fast.get(&key) {
            match serde_json::from_slice(&data) {
                Ok(value) => {
                    self.observe_get(started, true);
                    return Some(value);
                }
                Err(e) => {
                    debug!(target: "ai_gatekit::cache", %key, error = %e, "corrupt fast-tier payload dropped");
                    self.fast.remove(&key);
                }
            }
        }

        if let Some(data) = self.shared_get(&key).await {
            if let Ok(value) = serde_json::from_slice::<T>(&data) {
                // Promote so the next lookup stays local.
                self.fast.insert(key, data, self.config.default_ttl);
                self.observe_get(started, true);
                return Some(value);
            }
        }

        self.observe_get(started, false);
        None
    }

    /// Store a value in both tiers. The shared-tier write is best-effort: a
    /// fault there is logged and swallowed, never raised to the caller.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        params: &Params,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let started = Instant::now();
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            debug!(
                target: "ai_gatekit::cache",
                namespace,
                size = data.len(),
                "entry exceeds max_entry_size, skipped"
            );
            return Ok(());
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let key = self.derive_key(namespace, params);

        self.fast.insert(key.clone(), data.clone(), ttl);
        self.shared_set(&key, &data, ttl).await;
        self.observe_set(started);
        Ok(())
    }

    /// Remove every key matching a glob (`*` and `?`) from both tiers.
    /// Returns the number of distinct keys removed. Malformed patterns are
    /// rejected synchronously.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let matcher = glob_to_regex(pattern)?;
        let mut removed: HashSet<String> = self.fast.remove_matching(&matcher).into_iter().collect();

        if let Some(shared) = &self.shared {
            match self.bounded(shared.keys()).await {
                Ok(keys) => {
                    let mut degraded = false;
                    for key in keys.into_iter().filter(|k| matcher.is_match(k)) {
                        match self.bounded(shared.remove(&key)).await {
                            Ok(true) => {
                                removed.insert(key);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                self.note_shared_failure("remove", &e);
                                degraded = true;
                                break;
                            }
                        }
                    }
                    if !degraded {
                        self.note_shared_success();
                    }
                }
                Err(e) => self.note_shared_failure("keys", &e),
            }
        }

        Ok(removed.len())
    }

    /// Remove every key under a namespace. Equivalent to
    /// `delete_pattern("{namespace}:*")`.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<usize> {
        if !NAMESPACE_PATTERN.is_match(namespace) {
            return Err(Error::invalid_pattern(
                namespace,
                "namespace must be non-empty and free of wildcards",
            ));
        }
        self.delete_pattern(&format!("{}:*", namespace)).await
    }

    /// Pre-populate one namespace from known-popular identifiers.
    ///
    /// A generator failure for one identifier is logged and skipped; the
    /// returned count reflects only successful writes.
    pub async fn warm<G>(&self, namespace: &str, identifiers: &[String], generator: G) -> usize
    where
        G: Fn(String) -> BoxFuture<'static, Result<serde_json::Value>>,
    {
        let mut warmed = 0;
        for identifier in identifiers {
            match generator(identifier.clone()).await {
                Ok(value) => {
                    let params = identifier_params(identifier);
                    match self.set(namespace, &params, &value, None).await {
                        Ok(()) => warmed += 1,
                        Err(e) => warn!(
                            target: "ai_gatekit::cache",
                            namespace,
                            identifier = identifier.as_str(),
                            error = %e,
                            "warm write failed"
                        ),
                    }
                }
                Err(e) => warn!(
                    target: "ai_gatekit::cache",
                    namespace,
                    identifier = identifier.as_str(),
                    error = %e,
                    "warm generator failed"
                ),
            }
        }
        warmed
    }

    /// Probe both tiers and the sweeper task.
    pub async fn health_check(&self) -> CacheHealth {
        let backend_reachable = match &self.shared {
            Some(shared) => self.bounded(shared.len()).await.is_ok(),
            None => true,
        };
        let cleanup_task_alive = {
            let guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().is_some_and(|s| !s.handle.is_finished())
        };
        let status = if backend_reachable {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        CacheHealth {
            status,
            backend_reachable,
            cleanup_task_alive,
        }
    }

    /// Running aggregates; never recomputed by scanning history.
    pub fn get_stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let sets = self.stats.sets.load(Ordering::Relaxed);
        let latency_us = self.stats.latency_us_total.load(Ordering::Relaxed);
        let total = hits + misses + sets;
        let lookups = hits + misses;
        CacheStats {
            hit_rate_percent: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                latency_us as f64 / total as f64 / 1000.0
            },
            total_requests: total,
            entry_count: self.fast.len(),
        }
    }

    /// Start the background sweep task. Idempotent.
    ///
    /// Each cycle removes expired entries, then evicts least-recently-used
    /// entries until the fast tier is at or under `max_entries`. The task
    /// holds only a weak reference, so an undropped handle cannot keep the
    /// store alive.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return;
        }
        let (stop, mut stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(store) = weak.upgrade() else { break };
                        store.sweep_once();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(target: "ai_gatekit::cache", "sweeper stopped");
        });
        info!(target: "ai_gatekit::cache", interval_ms = interval.as_millis() as u64, "sweeper started");
        *guard = Some(SweeperHandle { stop, handle });
    }

    /// Signal the sweeper and wait for it to acknowledge termination.
    pub async fn shutdown(&self) {
        let sweeper = {
            let mut guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(SweeperHandle { stop, handle }) = sweeper {
            let _ = stop.send(true);
            let _ = handle.await;
        }
    }

    /// One sweep cycle: expired entries first, then LRU down to the cap.
    pub fn sweep_once(&self) {
        let expired = self.fast.sweep_expired(self.config.sweep_batch);
        let evicted = self
            .fast
            .evict_lru(self.config.max_entries, self.config.sweep_batch);
        if expired > 0 || evicted > 0 {
            debug!(
                target: "ai_gatekit::cache",
                expired,
                evicted,
                remaining = self.fast.len(),
                "sweep cycle"
            );
        }
    }

    fn observe_get(&self, started: Instant, hit: bool) {
        let latency = started.elapsed();
        if hit {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if let Some(recorder) = &self.recorder {
            recorder.record_lookup(hit, latency);
        }
    }

    fn observe_set(&self, started: Instant) {
        let latency = started.elapsed();
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.stats
            .latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if let Some(recorder) = &self.recorder {
            recorder.record_write(latency);
        }
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.shared_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::backend_unavailable(
                self.shared.as_ref().map_or("shared", |s| s.name()),
                format!("timed out after {:?}", self.config.shared_timeout),
            )),
        }
    }

    async fn shared_get(&self, key: &str) -> Option<Vec<u8>> {
        let shared = self.shared.as_ref()?;
        match self.bounded(shared.get(key)).await {
            Ok(found) => {
                self.note_shared_success();
                found
            }
            Err(e) => {
                self.note_shared_failure("get", &e);
                None
            }
        }
    }

    async fn shared_set(&self, key: &str, data: &[u8], ttl: Duration) {
        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        match self.bounded(shared.set(key, data, ttl)).await {
            Ok(()) => self.note_shared_success(),
            Err(e) => self.note_shared_failure("set", &e),
        }
    }

    /// Log the first failure of an outage; stay quiet until recovery.
    fn note_shared_failure(&self, op: &str, error: &Error) {
        if !self.outage_logged.swap(true, Ordering::Relaxed) {
            warn!(
                target: "ai_gatekit::cache",
                op,
                error = %error,
                "shared tier unavailable, degrading to fast-tier-only"
            );
        }
    }

    fn note_shared_success(&self) {
        if self.outage_logged.swap(false, Ordering::Relaxed) {
            info!(target: "ai_gatekit::cache", "shared tier recovered");
        }
    }
}

/// Translate a key glob (`*`, `?`) into an anchored regex, rejecting
/// patterns outside the key alphabet.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(Error::invalid_pattern(pattern, "pattern must be non-empty"));
    }
    if !GLOB_PATTERN.is_match(pattern) {
        return Err(Error::invalid_pattern(
            pattern,
            "only [A-Za-z0-9_.:-], `*`, and `?` are allowed",
        ));
    }
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
        .map_err(|e| Error::invalid_pattern(pattern, format!("translation failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation_matches_expected_sets() {
        let re = glob_to_regex("chat:a*").unwrap();
        assert!(re.is_match("chat:a1"));
        assert!(re.is_match("chat:abcdef"));
        assert!(!re.is_match("chat:b1"));
        assert!(!re.is_match("summarize:a1"));
    }

    #[test]
    fn glob_question_mark_is_single_character() {
        let re = glob_to_regex("ns:item-?").unwrap();
        assert!(re.is_match("ns:item-1"));
        assert!(!re.is_match("ns:item-10"));
    }

    #[test]
    fn glob_escapes_literal_dots() {
        let re = glob_to_regex("ns:v1.0:*").unwrap();
        assert!(re.is_match("ns:v1.0:abc"));
        assert!(!re.is_match("ns:v1x0:abc"));
    }

    #[test]
    fn malformed_globs_are_rejected() {
        assert!(glob_to_regex("").is_err());
        assert!(glob_to_regex("ns:[abc]").is_err());
        assert!(glob_to_regex("ns:(a|b)").is_err());
    }
}
