//! Rolling-window quota tracking with priority-aware admission.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::window::SlidingWindow;
use super::{CallCost, Decision, Priority, WindowKind};
use crate::clock::{MonotonicClock, TimeSource};
use crate::stats::StatsRecorder;
use crate::{Error, ErrorContext, Result};

/// Rolling-window budget limits. Immutable after construction.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Calls admitted per rolling minute.
    pub requests_per_minute: u64,
    /// Calls admitted per rolling day.
    pub requests_per_day: u64,
    /// Estimated tokens admitted per rolling minute.
    pub tokens_per_minute: u64,
    /// Reserved-capacity fraction per priority tier, if any.
    pub reserved: [Option<f64>; Priority::COUNT],
    /// When set, denials carry a retry hint instead of a bare denial.
    pub retry_hints: bool,
}

impl QuotaConfig {
    pub fn new(requests_per_minute: u64, requests_per_day: u64, tokens_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            requests_per_day,
            tokens_per_minute,
            reserved: [None; Priority::COUNT],
            retry_hints: false,
        }
    }

    /// Reserve `fraction` of every window's limit for `priority` callers.
    ///
    /// A reserved tier may draw from headroom below its floor even when the
    /// shared pool is exhausted. Admission-time preference only: an already
    /// admitted lower-priority request is never revoked.
    pub fn with_reserved_capacity(mut self, priority: Priority, fraction: f64) -> Self {
        self.reserved[priority.index()] = Some(fraction);
        self
    }

    /// Return `Deferred(retry_after)` instead of `Denied` on exhaustion.
    pub fn with_retry_hints(mut self, enabled: bool) -> Self {
        self.retry_hints = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 || self.requests_per_day == 0 {
            return Err(Error::configuration_with_context(
                "call limits must be non-zero",
                ErrorContext::new().with_source("quota_config").with_details(format!(
                    "requests_per_minute={}, requests_per_day={}",
                    self.requests_per_minute, self.requests_per_day
                )),
            ));
        }
        if self.tokens_per_minute == 0 {
            return Err(Error::configuration_with_context(
                "token limit must be non-zero",
                ErrorContext::new()
                    .with_source("quota_config")
                    .with_details("tokens_per_minute=0"),
            ));
        }
        for (idx, fraction) in self.reserved.iter().enumerate() {
            if let Some(f) = fraction {
                if !f.is_finite() || *f <= 0.0 || *f > 1.0 {
                    return Err(Error::configuration_with_context(
                        "reserved fraction must be within (0, 1]",
                        ErrorContext::new()
                            .with_source("quota_config")
                            .with_details(format!("tier={}, fraction={}", idx, f)),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Usage of a single rolling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    /// Percentage of the budget consumed (0.0 – 100.0).
    pub percentage: f64,
}

impl WindowUsage {
    pub fn new(used: u64, limit: u64) -> Self {
        let percentage = if limit == 0 {
            0.0
        } else {
            used as f64 / limit as f64 * 100.0
        };
        Self {
            used,
            limit,
            percentage,
        }
    }
}

/// Snapshot of all tracked windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaStats {
    pub per_minute: WindowUsage,
    pub per_day: WindowUsage,
    pub per_minute_tokens: WindowUsage,
}

impl QuotaStats {
    /// Highest budget-consumed percentage across all windows.
    pub fn max_percentage(&self) -> f64 {
        self.per_minute
            .percentage
            .max(self.per_day.percentage)
            .max(self.per_minute_tokens.percentage)
    }

    /// Returns `true` when any window has consumed more than `threshold_pct`
    /// of its budget (readiness probes use 90).
    pub fn is_saturated(&self, threshold_pct: f64) -> bool {
        self.max_percentage() > threshold_pct
    }
}

struct TrackerState {
    minute_calls: SlidingWindow,
    day_calls: SlidingWindow,
    minute_tokens: SlidingWindow,
}

impl TrackerState {
    fn window_mut(&mut self, kind: WindowKind) -> &mut SlidingWindow {
        match kind {
            WindowKind::PerMinute => &mut self.minute_calls,
            WindowKind::PerDay => &mut self.day_calls,
            WindowKind::PerMinuteTokens => &mut self.minute_tokens,
        }
    }
}

/// Enforces rolling-window budgets with priority-aware admission.
///
/// The read-compare-increment over all windows runs inside one exclusive
/// critical section, so two concurrent calls at the limit boundary can never
/// both observe room and admit past the limit.
///
/// Priority pre-emption is admission-time bias only: reclaiming capacity from
/// requests already admitted under a lower priority is unimplemented.
pub struct QuotaTracker {
    config: QuotaConfig,
    clock: Arc<dyn TimeSource>,
    epoch: Instant,
    state: Mutex<TrackerState>,
    recorder: Option<Arc<StatsRecorder>>,
}

impl QuotaTracker {
    pub fn new(config: QuotaConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: QuotaConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        config.validate()?;
        let epoch = clock.now();
        Ok(Self {
            config,
            clock,
            epoch,
            state: Mutex::new(TrackerState {
                minute_calls: SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1)),
                day_calls: SlidingWindow::new(
                    Duration::from_secs(24 * 60 * 60),
                    Duration::from_secs(60),
                ),
                minute_tokens: SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1)),
            }),
            recorder: None,
        })
    }

    /// Attach a recorder that observes every admission decision.
    pub fn with_recorder(mut self, recorder: Arc<StatsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.epoch)
    }

    /// Admission check and record in one step.
    ///
    /// Never fails closed: an internal fault (poisoned lock) degrades to
    /// `Admitted` with a logged warning, because refusing service is worse
    /// than a brief over-quota burst.
    pub fn check_and_record(&self, cost: CallCost, priority: Priority) -> Decision {
        let decision = match self.state.lock() {
            Ok(mut state) => self.admit_locked(&mut state, cost, priority),
            Err(_) => {
                warn!(
                    target: "ai_gatekit::quota",
                    "quota tracker state poisoned; failing open"
                );
                Decision::Admitted
            }
        };
        if let Some(recorder) = &self.recorder {
            recorder.record_admission(&decision);
        }
        decision
    }

    fn admit_locked(
        &self,
        state: &mut TrackerState,
        cost: CallCost,
        priority: Priority,
    ) -> Decision {
        let elapsed = self.elapsed();
        let checks = [
            (WindowKind::PerMinute, self.config.requests_per_minute, cost.calls),
            (WindowKind::PerDay, self.config.requests_per_day, cost.calls),
            (
                WindowKind::PerMinuteTokens,
                self.config.tokens_per_minute,
                cost.tokens,
            ),
        ];

        let reserved = self.config.reserved[priority.index()];
        let mut limiting = None;
        for (kind, limit, amount) in checks {
            let window = state.window_mut(kind);
            window.prune(elapsed);
            if amount == 0 || window.sum() + amount <= limit {
                continue;
            }
            // Shared pool exhausted for this window; a reserved tier may
            // still draw from headroom below its floor.
            let within_reservation = reserved.is_some_and(|fraction| {
                let floor = (fraction * limit as f64) as u64;
                window.tier_sum(priority) + amount <= floor
            });
            if !within_reservation {
                limiting = Some(kind);
                break;
            }
        }

        if let Some(kind) = limiting {
            if self.config.retry_hints {
                let retry_after = state.window_mut(kind).retry_after(elapsed);
                return Decision::Deferred { retry_after };
            }
            return Decision::Denied { window: kind };
        }

        for (kind, _, amount) in checks {
            if amount > 0 {
                state.window_mut(kind).record(elapsed, amount, priority);
            }
        }
        Decision::Admitted
    }

    /// Correct the token window once the true token count is known.
    ///
    /// The token budget is checked against a caller-supplied estimate at
    /// admission time; this adjusts the current bucket by the difference
    /// without re-running admission.
    pub fn reconcile(&self, priority: Priority, estimated_tokens: u64, actual_tokens: u64) {
        let delta = actual_tokens as i64 - estimated_tokens as i64;
        if delta == 0 {
            return;
        }
        match self.state.lock() {
            Ok(mut state) => {
                let elapsed = self.elapsed();
                state
                    .minute_tokens
                    .adjust_current(elapsed, delta, priority);
            }
            Err(_) => {
                warn!(
                    target: "ai_gatekit::quota",
                    "quota tracker state poisoned; dropping reconcile adjustment"
                );
            }
        }
    }

    /// Window usage snapshot. Reports regardless of internal faults: a
    /// poisoned guard is recovered rather than surfaced, so observability
    /// survives whatever broke the tracker.
    pub fn get_stats(&self) -> QuotaStats {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = self.elapsed();
        state.minute_calls.prune(elapsed);
        state.day_calls.prune(elapsed);
        state.minute_tokens.prune(elapsed);
        QuotaStats {
            per_minute: WindowUsage::new(
                state.minute_calls.sum(),
                self.config.requests_per_minute,
            ),
            per_day: WindowUsage::new(state.day_calls.sum(), self.config.requests_per_day),
            per_minute_tokens: WindowUsage::new(
                state.minute_tokens.sum(),
                self.config.tokens_per_minute,
            ),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(config: QuotaConfig) -> (Arc<ManualClock>, QuotaTracker) {
        let clock = Arc::new(ManualClock::new());
        let tracker = QuotaTracker::with_clock(config, clock.clone()).unwrap();
        (clock, tracker)
    }

    #[test]
    fn admits_within_limits() {
        let (_, t) = tracker(QuotaConfig::new(5, 100, 1_000));
        for _ in 0..5 {
            assert!(t
                .check_and_record(CallCost::with_tokens(10), Priority::Normal)
                .is_admitted());
        }
    }

    #[test]
    fn denies_sixth_call_at_limit_five() {
        let (_, t) = tracker(QuotaConfig::new(5, 100, 1_000));
        for _ in 0..5 {
            assert!(t
                .check_and_record(CallCost::default(), Priority::Normal)
                .is_admitted());
        }
        match t.check_and_record(CallCost::default(), Priority::Normal) {
            Decision::Denied { window } => assert_eq!(window, WindowKind::PerMinute),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn window_frees_after_aging() {
        let (clock, t) = tracker(QuotaConfig::new(2, 100, 1_000));
        assert!(t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
        assert!(t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
        assert!(!t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
        clock.advance(Duration::from_secs(61));
        assert!(t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
    }

    #[test]
    fn token_window_limits_independently() {
        let (_, t) = tracker(QuotaConfig::new(100, 1_000, 50));
        assert!(t
            .check_and_record(CallCost::with_tokens(40), Priority::Normal)
            .is_admitted());
        match t.check_and_record(CallCost::with_tokens(20), Priority::Normal) {
            Decision::Denied { window } => assert_eq!(window, WindowKind::PerMinuteTokens),
            other => panic!("expected token denial, got {:?}", other),
        }
    }

    #[test]
    fn retry_hints_defer_with_bounded_wait() {
        let (clock, t) = tracker(QuotaConfig::new(1, 100, 1_000).with_retry_hints(true));
        assert!(t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
        clock.advance(Duration::from_secs(20));
        match t.check_and_record(CallCost::default(), Priority::Normal) {
            Decision::Deferred { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected deferral, got {:?}", other),
        }
    }

    #[test]
    fn reserved_tier_draws_from_headroom() {
        let config = QuotaConfig::new(4, 100, 1_000)
            .with_reserved_capacity(Priority::Critical, 0.5);
        let (_, t) = tracker(config);
        // Normal traffic exhausts the shared pool.
        for _ in 0..4 {
            assert!(t
                .check_and_record(CallCost::default(), Priority::Normal)
                .is_admitted());
        }
        assert!(!t
            .check_and_record(CallCost::default(), Priority::Normal)
            .is_admitted());
        // Critical reservation: floor of 2, none consumed yet.
        assert!(t
            .check_and_record(CallCost::default(), Priority::Critical)
            .is_admitted());
        assert!(t
            .check_and_record(CallCost::default(), Priority::Critical)
            .is_admitted());
        // Reservation consumed: even critical is now denied.
        assert!(!t
            .check_and_record(CallCost::default(), Priority::Critical)
            .is_admitted());
    }

    #[test]
    fn reconcile_corrects_token_usage() {
        let (_, t) = tracker(QuotaConfig::new(100, 1_000, 100));
        assert!(t
            .check_and_record(CallCost::with_tokens(80), Priority::Normal)
            .is_admitted());
        // Call turned out cheaper than estimated.
        t.reconcile(Priority::Normal, 80, 30);
        assert_eq!(t.get_stats().per_minute_tokens.used, 30);
        // Correcting upwards works too.
        t.reconcile(Priority::Normal, 30, 90);
        assert_eq!(t.get_stats().per_minute_tokens.used, 90);
    }

    #[test]
    fn reconcile_never_goes_negative() {
        let (_, t) = tracker(QuotaConfig::new(100, 1_000, 100));
        assert!(t
            .check_and_record(CallCost::with_tokens(10), Priority::Normal)
            .is_admitted());
        t.reconcile(Priority::Normal, 500, 0);
        assert_eq!(t.get_stats().per_minute_tokens.used, 0);
    }

    #[test]
    fn stats_report_usage_percentages() {
        let (_, t) = tracker(QuotaConfig::new(10, 100, 1_000));
        for _ in 0..9 {
            t.check_and_record(CallCost::with_tokens(1), Priority::Normal);
        }
        let stats = t.get_stats();
        assert_eq!(stats.per_minute.used, 9);
        assert!((stats.per_minute.percentage - 90.0).abs() < f64::EPSILON);
        assert!(!stats.is_saturated(90.0));
        t.check_and_record(CallCost::with_tokens(1), Priority::Normal);
        assert!(t.get_stats().is_saturated(90.0));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(QuotaTracker::new(QuotaConfig::new(0, 100, 100)).is_err());
        assert!(QuotaTracker::new(QuotaConfig::new(10, 100, 0)).is_err());
    }

    #[test]
    fn rejects_bad_reserved_fraction() {
        let config = QuotaConfig::new(10, 100, 100)
            .with_reserved_capacity(Priority::Critical, 1.5);
        assert!(QuotaTracker::new(config).is_err());
    }
}
