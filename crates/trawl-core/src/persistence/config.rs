//! Persistence config - 状態ディレクトリ、durability、snapshot 間隔

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trigger::{AnyOf, EventCountTrigger, IntervalTrigger, Never, SnapshotTrigger};
use super::{CodecKind, DurabilityPolicy};

/// Where and how the run persists its open-task state. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub dir: PathBuf,
    pub durability: DurabilityPolicy,
    pub snapshot: SnapshotPolicy,
    pub codec: CodecKind,
}

impl PersistenceConfig {
    pub fn defaults() -> Self {
        Self {
            dir: PathBuf::from("./trawl-state"),
            durability: DurabilityPolicy::Immediate,
            snapshot: SnapshotPolicy::defaults(),
            codec: CodecKind::Json,
        }
    }

    /// Defaults rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::defaults()
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.dir.join(super::WAL_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(super::SNAPSHOT_FILE)
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.dir.join(super::DEAD_LETTER_FILE)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Snapshot after `every_events` WAL events or `every_secs` seconds,
/// whichever comes first. Zero disables that bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    pub every_events: u64,
    #[serde(rename = "every_secs", with = "crate::serde_ext::secs")]
    pub every: Duration,
}

impl SnapshotPolicy {
    /// 10,000 events or 30 seconds.
    pub fn defaults() -> Self {
        Self {
            every_events: 10_000,
            every: Duration::from_secs(30),
        }
    }

    /// Only explicit snapshots.
    pub fn manual() -> Self {
        Self {
            every_events: 0,
            every: Duration::ZERO,
        }
    }

    pub fn build(&self, now: DateTime<Utc>) -> Box<dyn SnapshotTrigger> {
        let mut triggers: Vec<Box<dyn SnapshotTrigger>> = Vec::new();
        if self.every_events > 0 {
            triggers.push(Box::new(EventCountTrigger::new(self.every_events)));
        }
        if !self.every.is_zero() {
            triggers.push(Box::new(IntervalTrigger::new(self.every, now)));
        }
        match triggers.len() {
            0 => Box::new(Never),
            1 => triggers.remove(0),
            _ => Box::new(AnyOf::new(triggers)),
        }
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_use_documented_layout() {
        let config = PersistenceConfig::in_dir("/var/lib/trawl");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/trawl/wal.log"));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/trawl/snapshot.bin")
        );
        assert_eq!(
            config.dead_letter_path(),
            PathBuf::from("/var/lib/trawl/dead_letters.jsonl")
        );
        assert_eq!(config.durability, DurabilityPolicy::Immediate);
        assert_eq!(config.snapshot.every_events, 10_000);
    }

    #[test]
    fn snapshot_policy_builds_combined_trigger() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = SnapshotPolicy {
            every_events: 2,
            every: Duration::from_secs(30),
        }
        .build(t0);

        trigger.record_event();
        assert!(!trigger.is_due(t0));
        assert!(trigger.is_due(t0 + chrono::Duration::seconds(30)));
        trigger.record_event();
        assert!(trigger.is_due(t0));
    }

    #[test]
    fn manual_policy_never_fires() {
        let t0 = Utc::now();
        let mut trigger = SnapshotPolicy::manual().build(t0);
        for _ in 0..100_000 {
            trigger.record_event();
        }
        assert!(!trigger.is_due(t0 + chrono::Duration::days(1)));
    }
}
