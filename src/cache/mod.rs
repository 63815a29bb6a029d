//! # Response Caching Module
//!
//! This module serves previously computed answers without recomputation,
//! reducing API calls against a per-call-costly generation backend.
//!
//! ## Overview
//!
//! Caching is valuable for:
//! - Reducing API costs by avoiding duplicate requests
//! - Improving response latency for repeated queries
//! - Surviving brief provider outages in degraded mode
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Two-tier store with TTL, LRU eviction, and bulk invalidation |
//! | [`CacheConfig`] | TTL, capacity, sweep, and version configuration |
//! | [`CacheBackend`] | Trait for the optional shared durable tier |
//! | [`MemoryBackend`] | In-process shared backend (tests, single-node) |
//! | [`NullBackend`] | No-op backend for local-only operation |
//! | [`KeyGenerator`] | Versioned, canonical cache key derivation |
//!
//! ## Cache Key Generation
//!
//! Keys are derived from the namespace, the current content-version tag, and
//! a canonical serialization of the request parameters (lexicographic field
//! order). Identical requests always resolve to identical keys; bumping the
//! version makes every prior key unreachable without a scan.
//!
//! ## Example
//!
//! ```rust
//! use ai_gatekit::cache::{CacheConfig, CacheStore};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = CacheStore::new(
//!     CacheConfig::new()
//!         .with_default_ttl(Duration::from_secs(3600))
//!         .with_max_entries(1000)
//!         .with_version("prompt-v3"),
//! )?;
//!
//! let mut params = ai_gatekit::cache::Params::new();
//! params.insert("prompt".into(), "hello".into());
//! store.set("chat", &params, &"cached answer", None).await?;
//! assert_eq!(
//!     store.get::<String>("chat", &params).await.as_deref(),
//!     Some("cached answer")
//! );
//! # Ok::<(), ai_gatekit::Error>(())
//! # }).unwrap();
//! ```

mod backend;
mod key;
mod store;

#[cfg(feature = "redis-backend")]
mod redis;

pub use backend::{CacheBackend, MemoryBackend, MemoryTier, NullBackend};
pub use key::{identifier_params, CacheKey, KeyGenerator, Params};
pub use store::{CacheConfig, CacheHealth, CacheStats, CacheStore, HealthStatus};

#[cfg(feature = "redis-backend")]
pub use redis::RedisBackend;
