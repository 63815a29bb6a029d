//! Bucketed rolling-window counters.

use std::collections::VecDeque;
use std::time::Duration;

use super::Priority;

/// One lazily created time slot within a window.
#[derive(Debug, Clone)]
struct Bucket {
    slot: u64,
    amount: u64,
    by_tier: [u64; Priority::COUNT],
}

/// Monotonically advancing bucketed counter over a rolling window.
///
/// Buckets are created on first observation in a slot and pruned whenever an
/// operation observes they have aged out; no separate garbage-collection pass
/// runs. Invariant: `total` (and each tier total) always equals the sum over
/// live buckets.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    bucket_width: Duration,
    /// Number of live slots; a bucket at slot `s` ages out once the current
    /// slot reaches `s + slots`.
    slots: u64,
    buckets: VecDeque<Bucket>,
    total: u64,
    tier_totals: [u64; Priority::COUNT],
}

impl SlidingWindow {
    pub(crate) fn new(window: Duration, bucket_width: Duration) -> Self {
        debug_assert!(!bucket_width.is_zero() && window >= bucket_width);
        let slots = (window.as_millis() / bucket_width.as_millis()).max(1) as u64;
        Self {
            bucket_width,
            slots,
            buckets: VecDeque::new(),
            total: 0,
            tier_totals: [0; Priority::COUNT],
        }
    }

    pub(crate) fn window_length(&self) -> Duration {
        self.bucket_width * self.slots as u32
    }

    fn slot_for(&self, elapsed: Duration) -> u64 {
        (elapsed.as_millis() / self.bucket_width.as_millis()) as u64
    }

    /// Drop buckets that have aged out of the window as of `elapsed`.
    pub(crate) fn prune(&mut self, elapsed: Duration) {
        let current = self.slot_for(elapsed);
        while self
            .buckets
            .front()
            .is_some_and(|front| front.slot + self.slots <= current)
        {
            if let Some(expired) = self.buckets.pop_front() {
                self.total -= expired.amount;
                for (tier_total, tier_amount) in
                    self.tier_totals.iter_mut().zip(expired.by_tier.iter())
                {
                    *tier_total -= tier_amount;
                }
            }
        }
    }

    /// Sum of all live buckets. Callers must `prune` first.
    pub(crate) fn sum(&self) -> u64 {
        self.total
    }

    /// Live usage attributed to one priority tier. Callers must `prune` first.
    pub(crate) fn tier_sum(&self, priority: Priority) -> u64 {
        self.tier_totals[priority.index()]
    }

    /// Add `amount` to the bucket covering `elapsed`, attributed to `priority`.
    pub(crate) fn record(&mut self, elapsed: Duration, amount: u64, priority: Priority) {
        self.prune(elapsed);
        let slot = self.slot_for(elapsed);
        let tier = priority.index();
        match self.buckets.back_mut() {
            Some(back) if back.slot == slot => {
                back.amount += amount;
                back.by_tier[tier] += amount;
            }
            _ => {
                let mut by_tier = [0; Priority::COUNT];
                by_tier[tier] = amount;
                self.buckets.push_back(Bucket {
                    slot,
                    amount,
                    by_tier,
                });
            }
        }
        self.total += amount;
        self.tier_totals[tier] += amount;
    }

    /// Adjust the current bucket by `delta` without re-running admission.
    ///
    /// A negative adjustment never takes the bucket (or its tier share) below
    /// zero: the clamped remainder is simply dropped.
    pub(crate) fn adjust_current(&mut self, elapsed: Duration, delta: i64, priority: Priority) {
        self.prune(elapsed);
        if delta >= 0 {
            self.record(elapsed, delta as u64, priority);
            return;
        }
        let slot = self.slot_for(elapsed);
        let tier = priority.index();
        if let Some(back) = self.buckets.back_mut() {
            if back.slot == slot {
                let take = (delta.unsigned_abs()).min(back.by_tier[tier]);
                back.amount -= take;
                back.by_tier[tier] -= take;
                self.total -= take;
                self.tier_totals[tier] -= take;
            }
        }
    }

    /// Time until the oldest counted bucket ages out, as of `elapsed`.
    ///
    /// Returns the full window length when no bucket is live (nothing to wait
    /// for beyond the window itself).
    pub(crate) fn retry_after(&self, elapsed: Duration) -> Duration {
        match self.buckets.front() {
            Some(front) => {
                let expires_at = self.bucket_width * (front.slot + self.slots) as u32;
                expires_at.saturating_sub(elapsed)
            }
            None => self.window_length(),
        }
    }
}
