//! Cache tiers and backend implementations.

use crate::clock::TimeSource;
use crate::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// One fast-tier entry. Validity is purely (not expired); the content version
/// lives inside the key, so stale-version entries are unreachable, not
/// invalid.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    data: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, now: Instant, ttl: Duration) -> Self {
        Self {
            data,
            created_at: now,
            ttl,
            last_accessed: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Fast in-memory tier.
///
/// Critical sections are single-entry operations; the sweeper's scan/remove
/// passes re-acquire the write lock per bounded batch so concurrent gets and
/// sets are never blocked for longer than one batch.
pub struct MemoryTier {
    clock: Arc<dyn TimeSource>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Lookup with lazy expiry: an expired entry is removed and reported as a
    /// miss. A hit refreshes the last-access timestamp.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.last_accessed = now;
                Some(entry.data.clone())
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, data: Vec<u8>, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, CacheEntry::new(data, now, ttl));
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    /// Remove every key matching `matcher`; returns the removed keys.
    pub fn remove_matching(&self, matcher: &Regex) -> Vec<String> {
        let candidates: Vec<String> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .keys()
                .filter(|k| matcher.is_match(k))
                .cloned()
                .collect()
        };
        let mut removed = Vec::new();
        if candidates.is_empty() {
            return removed;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for key in candidates {
            // Keys visible at call entry and still matching at removal time.
            if entries.remove(&key).is_some() {
                removed.push(key);
            }
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    /// Count of entries currently held, expired or not. Expired entries are
    /// reclaimed lazily and by the sweeper, never counted as hits.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Sweep pass 1: drop entries whose expiry has passed, `batch` at a time.
    pub fn sweep_expired(&self, batch: usize) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        let mut removed = 0;
        for chunk in expired.chunks(batch.max(1)) {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            for key in chunk {
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Sweep pass 2: while over `max_entries`, remove the least recently
    /// accessed entries, `batch` at a time.
    pub fn evict_lru(&self, max_entries: usize, batch: usize) -> usize {
        let mut removed = 0;
        loop {
            let victims: Vec<String> = {
                let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
                let over = entries.len().saturating_sub(max_entries);
                if over == 0 {
                    break;
                }
                let mut by_recency: Vec<(&String, Instant)> = entries
                    .iter()
                    .map(|(k, e)| (k, e.last_accessed))
                    .collect();
                by_recency.sort_by_key(|(_, accessed)| *accessed);
                by_recency
                    .into_iter()
                    .take(over.min(batch.max(1)))
                    .map(|(k, _)| k.clone())
                    .collect()
            };
            if victims.is_empty() {
                break;
            }
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            for key in &victims {
                if entries.remove(key).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// A pluggable shared (durable) cache tier.
///
/// Implementations are selected at construction time via configuration;
/// nothing is probed at import time. [`NullBackend`] is the no-op default for
/// local-only operation.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<bool>;
    /// Key enumeration for pattern invalidation. Backends that cannot
    /// enumerate return an empty list; pattern deletes then cover only the
    /// tiers that can.
    async fn keys(&self) -> Result<Vec<String>>;
    async fn len(&self) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// No-op backend for local-only operation.
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullBackend {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

/// In-process shared backend: a [`MemoryTier`] behind the [`CacheBackend`]
/// trait. Useful as a stand-in shared tier in tests and single-process
/// deployments.
pub struct MemoryBackend {
    tier: MemoryTier,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            tier: MemoryTier::new(clock),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tier.get(key))
    }
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.tier.insert(key.to_string(), value.to_vec(), ttl);
        Ok(())
    }
    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.tier.remove(key))
    }
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.tier.keys())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.tier.len())
    }
    async fn clear(&self) -> Result<()> {
        self.tier.clear();
        Ok(())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tier() -> (Arc<ManualClock>, MemoryTier) {
        let clock = Arc::new(ManualClock::new());
        let tier = MemoryTier::new(clock.clone());
        (clock, tier)
    }

    #[test]
    fn get_after_ttl_is_a_miss_and_removes() {
        let (clock, tier) = tier();
        tier.insert("k".into(), b"v".to_vec(), Duration::from_secs(10));
        assert_eq!(tier.get("k"), Some(b"v".to_vec()));
        clock.advance(Duration::from_secs(11));
        assert_eq!(tier.get("k"), None);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn sweep_expired_removes_only_expired() {
        let (clock, tier) = tier();
        tier.insert("short".into(), b"a".to_vec(), Duration::from_secs(5));
        tier.insert("long".into(), b"b".to_vec(), Duration::from_secs(500));
        clock.advance(Duration::from_secs(6));
        assert_eq!(tier.sweep_expired(16), 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.get("long").is_some());
    }

    #[test]
    fn evict_lru_removes_least_recently_accessed_first() {
        let (clock, tier) = tier();
        let ttl = Duration::from_secs(600);
        tier.insert("a".into(), b"1".to_vec(), ttl);
        clock.advance(Duration::from_secs(1));
        tier.insert("b".into(), b"2".to_vec(), ttl);
        clock.advance(Duration::from_secs(1));
        tier.insert("c".into(), b"3".to_vec(), ttl);
        clock.advance(Duration::from_secs(1));
        // Touch "a" so "b" becomes the coldest entry.
        tier.get("a");
        assert_eq!(tier.evict_lru(2, 16), 1);
        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn evict_lru_respects_batch_size() {
        let (_, tier) = tier();
        for i in 0..10 {
            tier.insert(format!("k{}", i), vec![i], Duration::from_secs(600));
        }
        assert_eq!(tier.evict_lru(4, 2), 6);
        assert_eq!(tier.len(), 4);
    }

    #[test]
    fn remove_matching_is_exact() {
        let (_, tier) = tier();
        let ttl = Duration::from_secs(600);
        tier.insert("ns:a1".into(), b"1".to_vec(), ttl);
        tier.insert("ns:a2".into(), b"2".to_vec(), ttl);
        tier.insert("ns:b1".into(), b"3".to_vec(), ttl);
        let matcher = Regex::new("^ns:a.*$").unwrap();
        let removed = tier.remove_matching(&matcher);
        assert_eq!(removed.len(), 2);
        assert!(tier.get("ns:b1").is_some());
    }

    #[tokio::test]
    async fn null_backend_is_inert() {
        let backend = NullBackend::new();
        backend
            .set("k", b"v", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_backend_round_trips() {
        let backend = MemoryBackend::new(Arc::new(ManualClock::new()));
        backend
            .set("k", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(backend.remove("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }
}
