//! When to take a snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ports::clock::between;

/// Decides when the in-flight buffer should snapshot.
///
/// The buffer calls `record_event` once per WAL append, asks `is_due` after
/// each append and during idle maintenance, and calls `reset` once a snapshot
/// has been taken.
pub trait SnapshotTrigger: Send + Sync {
    fn record_event(&mut self);

    fn is_due(&self, now: DateTime<Utc>) -> bool;

    fn reset(&mut self, now: DateTime<Utc>);
}

/// Due after `every` events since the last snapshot.
#[derive(Debug, Clone)]
pub struct EventCountTrigger {
    every: u64,
    seen: u64,
}

impl EventCountTrigger {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }
}

impl SnapshotTrigger for EventCountTrigger {
    fn record_event(&mut self) {
        self.seen += 1;
    }

    fn is_due(&self, _now: DateTime<Utc>) -> bool {
        self.seen >= self.every
    }

    fn reset(&mut self, _now: DateTime<Utc>) {
        self.seen = 0;
    }
}

/// Due once `every` has elapsed since the last snapshot, provided something
/// happened in between.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    every: Duration,
    since: DateTime<Utc>,
    dirty: bool,
}

impl IntervalTrigger {
    pub fn new(every: Duration, start: DateTime<Utc>) -> Self {
        Self {
            every,
            since: start,
            dirty: false,
        }
    }
}

impl SnapshotTrigger for IntervalTrigger {
    fn record_event(&mut self) {
        self.dirty = true;
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.dirty && between(self.since, now) >= self.every
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.since = now;
        self.dirty = false;
    }
}

/// Due when any inner trigger is due.
pub struct AnyOf {
    triggers: Vec<Box<dyn SnapshotTrigger>>,
}

impl AnyOf {
    pub fn new(triggers: Vec<Box<dyn SnapshotTrigger>>) -> Self {
        Self { triggers }
    }
}

impl SnapshotTrigger for AnyOf {
    fn record_event(&mut self) {
        for t in &mut self.triggers {
            t.record_event();
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.triggers.iter().any(|t| t.is_due(now))
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        for t in &mut self.triggers {
            t.reset(now);
        }
    }
}

/// Never due. Snapshots then only happen on explicit request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl SnapshotTrigger for Never {
    fn record_event(&mut self) {}

    fn is_due(&self, _now: DateTime<Utc>) -> bool {
        false
    }

    fn reset(&mut self, _now: DateTime<Utc>) {}
}
