//! # Stats and Readiness Module
//!
//! Running aggregates for both subsystems, observed on every operation and
//! never recomputed from history. A bounded recent-activity ring supports
//! lightweight diagnostics; merged views let a readiness probe compute a
//! single budget-consumed figure per window.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`StatsRecorder`] | Atomic counters plus a fixed-capacity activity ring |
//! | [`StatsSnapshot`] | Point-in-time view of all counters |
//! | [`ServiceOverview`] | Merged quota + cache view for health probes |

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::quota::{Decision, QuotaStats, WindowKind};

/// Budget percentage above which a readiness probe reports unready.
pub const READINESS_THRESHOLD_PCT: f64 = 90.0;

/// What happened, for the diagnostics ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Admitted,
    Deferred,
    Denied,
    CacheHit,
    CacheMiss,
    CacheWrite,
}

/// One entry in the bounded recent-activity ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    /// Limiting window for denials, empty otherwise.
    pub detail: Option<String>,
    pub at: SystemTime,
}

impl ActivityEvent {
    fn new(kind: ActivityKind, detail: Option<String>) -> Self {
        Self {
            kind,
            detail,
            at: SystemTime::now(),
        }
    }
}

/// Point-in-time counter view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub admitted: u64,
    pub deferred: u64,
    pub denied: u64,
    pub avg_latency_ms: f64,
}

/// Usage of one quota window, as a probe sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowBudget {
    pub window: WindowKind,
    pub percentage: f64,
}

/// Merged quota + cache view for a single readiness decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOverview {
    pub quota: QuotaStats,
    pub cache: CacheStats,
    pub windows: Vec<WindowBudget>,
    pub ready: bool,
}

/// Aggregates observations from the quota tracker and the cache store.
///
/// All counters are atomics; the only lock guards the diagnostics ring,
/// which has fixed capacity and O(1) insertion (the oldest entry is dropped,
/// never grown past capacity).
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    admitted: AtomicU64,
    deferred: AtomicU64,
    denied: AtomicU64,
    latency_us_total: AtomicU64,
    ring_capacity: usize,
    ring: Mutex<VecDeque<ActivityEvent>>,
}

impl StatsRecorder {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            latency_us_total: AtomicU64::new(0),
            ring_capacity: ring_capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_admission(&self, decision: &Decision) {
        let event = match decision {
            Decision::Admitted => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                ActivityEvent::new(ActivityKind::Admitted, None)
            }
            Decision::Deferred { .. } => {
                self.deferred.fetch_add(1, Ordering::Relaxed);
                ActivityEvent::new(ActivityKind::Deferred, None)
            }
            Decision::Denied { window } => {
                self.denied.fetch_add(1, Ordering::Relaxed);
                ActivityEvent::new(ActivityKind::Denied, Some(window.as_str().to_string()))
            }
        };
        self.push(event);
    }

    pub fn record_lookup(&self, hit: bool, latency: Duration) {
        let kind = if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            ActivityKind::CacheHit
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            ActivityKind::CacheMiss
        };
        self.latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.push(ActivityEvent::new(kind, None));
    }

    pub fn record_write(&self, latency: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.push(ActivityEvent::new(ActivityKind::CacheWrite, None));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let total = hits + misses + writes;
        let latency_us = self.latency_us_total.load(Ordering::Relaxed);
        StatsSnapshot {
            total_requests: total,
            hits,
            misses,
            writes,
            admitted: self.admitted.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                latency_us as f64 / total as f64 / 1000.0
            },
        }
    }

    /// Most recent events, oldest first.
    pub fn recent(&self) -> Vec<ActivityEvent> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter().cloned().collect()
    }

    /// Merge both subsystems into one probe-friendly view: per-window budget
    /// percentages and a single ready flag (unready above
    /// [`READINESS_THRESHOLD_PCT`]).
    pub fn overview(&self, quota: &QuotaStats, cache: &CacheStats) -> ServiceOverview {
        let windows = vec![
            WindowBudget {
                window: WindowKind::PerMinute,
                percentage: quota.per_minute.percentage,
            },
            WindowBudget {
                window: WindowKind::PerDay,
                percentage: quota.per_day.percentage,
            },
            WindowBudget {
                window: WindowKind::PerMinuteTokens,
                percentage: quota.per_minute_tokens.percentage,
            },
        ];
        ServiceOverview {
            quota: *quota,
            cache: *cache,
            windows,
            ready: !quota.is_saturated(READINESS_THRESHOLD_PCT),
        }
    }

    fn push(&self, event: ActivityEvent) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() == self.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new(256)
    }
}
