//! Time source abstraction
//!
//! The scheduler, feeds and recording sessions all read time through
//! [`Clock`] so chunk rotation and session expiry can be driven by a manual
//! clock in tests.
//!
//! Two readings are kept apart: [`Clock::now`] is wall-clock time and only
//! names things (chunk files, log lines), while [`Clock::elapsed`] is
//! monotonic and is what every interval, rotation and cap is measured with.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::time::Instant;

/// A source of wall-clock and monotonic time
pub trait Clock: Send + Sync {
    /// Wall-clock time. May jump in either direction.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic time since the clock was created. Never goes backwards.
    fn elapsed(&self) -> std::time::Duration;
}

/// The real clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn elapsed(&self) -> std::time::Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    wall: Mutex<DateTime<Utc>>,
    elapsed: Mutex<std::time::Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            wall: Mutex::new(start),
            elapsed: Mutex::new(std::time::Duration::ZERO),
        }
    }

    /// Let time pass. Both readings move; a negative step only moves the
    /// wall clock.
    pub fn advance(&self, by: Duration) {
        *self.wall.lock() += by;
        if let Ok(step) = by.to_std() {
            *self.elapsed.lock() += step;
        }
    }

    /// Step the wall clock to `to` without any time passing, like an NTP
    /// correction or a DST change
    pub fn set(&self, to: DateTime<Utc>) {
        *self.wall.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }

    fn elapsed(&self) -> std::time::Duration {
        *self.elapsed.lock()
    }
}
