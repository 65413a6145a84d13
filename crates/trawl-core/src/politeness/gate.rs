//! Per-lane gates.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Decides whether one operation on a lane may proceed at `now`.
///
/// Returns `Duration::ZERO` when permitted (the permit is consumed), otherwise
/// the time left until the next permitted instant. Never sleeps.
pub trait PolitenessGate: Send + Sync {
    fn try_acquire(&self, now: DateTime<Utc>) -> Duration;
}

/// Always permits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGate;

impl PolitenessGate for NoopGate {
    fn try_acquire(&self, _now: DateTime<Utc>) -> Duration {
        Duration::ZERO
    }
}

/// Fixed-interval throttle: two permits are at least `interval` apart.
///
/// The next permitted instant lives in one atomic (microseconds since the
/// epoch); check and reservation happen in a single compare-exchange, so
/// concurrent callers cannot both take the same slot.
#[derive(Debug)]
pub struct FixedIntervalGate {
    interval_us: i64,
    next_permit_us: AtomicI64,
}

impl FixedIntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_us: interval.as_micros().min(i64::MAX as u128) as i64,
            next_permit_us: AtomicI64::new(i64::MIN),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us as u64)
    }
}

impl PolitenessGate for FixedIntervalGate {
    fn try_acquire(&self, now: DateTime<Utc>) -> Duration {
        let now_us = now.timestamp_micros();
        loop {
            let next = self.next_permit_us.load(Ordering::Acquire);
            if now_us < next {
                return Duration::from_micros((next - now_us) as u64);
            }
            let reserved = now_us.saturating_add(self.interval_us);
            match self.next_permit_us.compare_exchange_weak(
                next,
                reserved,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Duration::ZERO,
                Err(_) => continue,
            }
        }
    }
}
