//! Monotonic time sources.
//!
//! Quota windows and cache TTLs read time through the [`TimeSource`] trait so
//! that tests can age state deterministically instead of sleeping. Production
//! code uses [`MonotonicClock`]; tests use [`ManualClock`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Provider of monotonic time, selected at construction time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production time source backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced time source for deterministic tests.
pub struct ManualClock {
    epoch: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `delta`. All subsequent `now()` calls observe it.
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch + offset
    }
}
