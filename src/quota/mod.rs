//! Admission control against rolling-window budgets.
//!
//! # Quota Module
//!
//! This module enforces provider-imposed call and token budgets before any
//! outbound request is made, with priority-aware admission for callers that
//! matter more.
//!
//! ## Overview
//!
//! Rate-limited generation APIs bill per call and throttle on several rolling
//! windows at once. The tracker keeps one bucketed counter per window and
//! answers a single question atomically: does this request fit in every
//! window right now?
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`QuotaTracker`] | Rolling-window admission with one exclusive critical section |
//! | [`QuotaConfig`] | RPM/RPD/TPM limits plus per-tier reservations |
//! | [`Decision`] | Structured admission outcome (never an error) |
//! | [`Priority`] | Three-tier caller priority |
//! | [`QuotaStats`] | Per-window usage for readiness probes |
//!
//! ## Example
//!
//! ```rust
//! use ai_gatekit::quota::{CallCost, Priority, QuotaConfig, QuotaTracker};
//!
//! let tracker = QuotaTracker::new(
//!     QuotaConfig::new(60, 5_000, 100_000)
//!         .with_reserved_capacity(Priority::Critical, 0.2)
//!         .with_retry_hints(true),
//! )?;
//!
//! let decision = tracker.check_and_record(CallCost::with_tokens(1_200), Priority::Normal);
//! if decision.is_admitted() {
//!     // make the generation call, then:
//!     tracker.reconcile(Priority::Normal, 1_200, 987);
//! }
//! # Ok::<(), ai_gatekit::Error>(())
//! ```

mod tracker;
mod window;

pub use tracker::{QuotaConfig, QuotaStats, QuotaTracker, WindowUsage};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Batch and backfill traffic; first to starve.
    Background,
    /// Interactive traffic.
    Normal,
    /// Traffic allowed to draw on reserved capacity.
    Critical,
}

impl Priority {
    /// Number of tiers; sizes the per-tier accounting arrays.
    pub const COUNT: usize = 3;

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Background => 0,
            Priority::Normal => 1,
            Priority::Critical => 2,
        }
    }
}

/// Cost of one admission request: always one call, plus an estimated token
/// spend. The token count is an estimate by necessity (the true count is
/// unknowable before the call completes); see [`QuotaTracker::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallCost {
    pub calls: u64,
    pub tokens: u64,
}

impl CallCost {
    pub fn with_tokens(tokens: u64) -> Self {
        Self { calls: 1, tokens }
    }
}

impl Default for CallCost {
    fn default() -> Self {
        Self { calls: 1, tokens: 0 }
    }
}

/// The window that limited an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    PerMinute,
    PerDay,
    PerMinuteTokens,
}

impl WindowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::PerMinute => "per_minute",
            WindowKind::PerDay => "per_day",
            WindowKind::PerMinuteTokens => "per_minute_tokens",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured admission outcome. Quota exhaustion is expected traffic
/// shaping, not a fault, so it is a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits every window and has been recorded.
    Admitted,
    /// Over budget; retry once `retry_after` has elapsed.
    Deferred { retry_after: Duration },
    /// Over budget in the named window.
    Denied { window: WindowKind },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}
