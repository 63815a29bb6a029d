//! # ai-gatekit
//!
//! Admission control and response caching for applications calling
//! rate-limited, per-call-costly generation APIs.
//!
//! ## Overview
//!
//! This library sits between request handlers and an external generation
//! backend and does two cooperating jobs: it never lets outbound call or
//! token volume exceed provider-imposed budgets (while prioritizing some
//! callers over others), and it serves previously computed answers without
//! recomputation, invalidating them safely when generation logic or prompt
//! versions change.
//!
//! ## Core Philosophy
//!
//! - **Explicit ownership**: services are constructed at startup and passed
//!   by reference; no module-level singletons, no import-time probing
//! - **Structured outcomes**: quota exhaustion is a [`quota::Decision`]
//!   value, never an error
//! - **Graceful degradation**: a slow or down shared tier degrades to misses
//!   and dropped writes; an internal tracker fault fails open
//! - **Clean shutdown**: background work is cancellable and joined, never
//!   left to process-exit semantics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_gatekit::cache::{CacheConfig, CacheStore, Params};
//! use ai_gatekit::quota::{CallCost, Priority, QuotaConfig, QuotaTracker};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ai_gatekit::Result<()> {
//!     let tracker = QuotaTracker::new(QuotaConfig::new(60, 5_000, 100_000))?;
//!     let store = Arc::new(CacheStore::new(CacheConfig::new())?);
//!     store.start_sweeper();
//!
//!     let mut params = Params::new();
//!     params.insert("prompt".into(), "hello".into());
//!
//!     if tracker.check_and_record(CallCost::with_tokens(500), Priority::Normal).is_admitted() {
//!         if store.get::<String>("chat", &params).await.is_none() {
//!             let answer = "generated elsewhere".to_string();
//!             store.set("chat", &params, &answer, None).await?;
//!         }
//!     }
//!
//!     store.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`quota`] | Rolling-window admission control with priority tiers |
//! | [`cache`] | Two-tier response cache with versioned keys and eviction |
//! | [`warm`] | Proactive cache population from popularity registries |
//! | [`stats`] | Running aggregates and merged readiness views |
//! | [`clock`] | Monotonic time sources (production and test) |

pub mod cache;
pub mod clock;
pub mod quota;
pub mod stats;
pub mod warm;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheStore};
pub use quota::{CallCost, Decision, Priority, QuotaConfig, QuotaTracker};
pub use stats::StatsRecorder;
pub use warm::CacheWarmer;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
