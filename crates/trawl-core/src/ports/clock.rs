//! Clock port - source of "now".
//!
//! Politeness gates, retry due times and snapshot interval triggers all read
//! time through this trait, so tests can drive time by hand with
//! [`ManualClock`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += to_chrono(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Upper bound for converted durations; keeps `DateTime + Duration` in range.
const MAX_SPAN_DAYS: i64 = 365 * 100;

/// Converts a std duration, capped at a century.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(MAX_SPAN_DAYS);
    chrono::Duration::from_std(d).map_or(cap, |d| d.min(cap))
}

/// Non-negative std duration between two instants (zero if `later` is earlier).
pub fn between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
