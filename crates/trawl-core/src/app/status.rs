//! Run counters and a serialisable view of them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters updated by the scheduler.
#[derive(Debug, Default)]
pub struct RunStats {
    succeeded: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    duplicates: AtomicU64,
    out_of_scope: AtomicU64,
    deferred: AtomicU64,
    discovered: AtomicU64,
    too_deep: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn out_of_scope(&self) {
        self.out_of_scope.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn too_deep(&self, n: u64) {
        self.too_deep.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time counts: totals so far plus current queue depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub duplicates: u64,
    pub out_of_scope: u64,
    pub deferred: u64,
    pub discovered: u64,
    pub too_deep: u64,

    pub frontier: usize,
    pub retry_scheduled: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
    pub seen: usize,
}

impl RunCounts {
    pub(crate) fn from_stats(stats: &RunStats) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            succeeded: load(&stats.succeeded),
            retried: load(&stats.retried),
            dead_lettered: load(&stats.dead_lettered),
            duplicates: load(&stats.duplicates),
            out_of_scope: load(&stats.out_of_scope),
            deferred: load(&stats.deferred),
            discovered: load(&stats.discovered),
            too_deep: load(&stats.too_deep),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = RunStats::new();
        stats.succeeded();
        stats.succeeded();
        stats.discovered(5);
        stats.dead_lettered();

        let counts = RunCounts::from_stats(&stats);
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.discovered, 5);
        assert_eq!(counts.dead_lettered, 1);
        assert_eq!(counts.retried, 0);
    }

    #[test]
    fn counts_serialize_with_snake_case_fields() {
        let json = serde_json::to_value(RunCounts::default()).unwrap();
        assert_eq!(json["retry_scheduled"], 0);
        assert_eq!(json["dead_lettered"], 0);
    }
}
