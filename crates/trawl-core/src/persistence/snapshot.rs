//! Point-in-time copies of the durable state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state::{DurableState, InFlightEntry, ParkedRetry};
use super::Codec;
use crate::domain::{PersistenceError, ProcessingTask};

/// Durable state as of WAL sequence `seq`: every record with a sequence
/// `<= seq` is reflected, none after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub taken_at: DateTime<Utc>,
    pub in_flight: Vec<InFlightEntry>,
    #[serde(default)]
    pub retrying: Vec<ParkedRetry>,
    #[serde(default)]
    pub recovered: Vec<ProcessingTask>,
}

impl Snapshot {
    pub fn capture(seq: u64, taken_at: DateTime<Utc>, state: &DurableState) -> Self {
        Self {
            seq,
            taken_at,
            in_flight: state.in_flight.values().cloned().collect(),
            retrying: state.retrying.values().cloned().collect(),
            recovered: state.recovered.values().cloned().collect(),
        }
    }

    pub fn into_state(self) -> DurableState {
        let mut state = DurableState::default();
        for entry in self.in_flight {
            state.in_flight.insert(entry.task.id(), entry);
        }
        for parked in self.retrying {
            state.retrying.insert(parked.task.id(), parked);
        }
        for task in self.recovered {
            state.recovered.insert(task.id(), task);
        }
        state
    }
}

/// The latest snapshot on disk, replaced atomically.
pub struct SnapshotStore {
    path: PathBuf,
    codec: Arc<dyn Codec>,
    last_written: Mutex<Option<u64>>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, codec: Arc<dyn Codec>) -> Self {
        Self {
            path: path.into(),
            codec,
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `snapshot` unless one at the same or a later sequence is
    /// already on disk. Returns whether a file was written.
    ///
    /// Readers only ever see the previous file or the new one.
    pub fn write(&self, snapshot: &Snapshot) -> Result<bool, PersistenceError> {
        let mut last = self.last_written.lock();
        if last.is_some_and(|seq| seq >= snapshot.seq) {
            debug!(seq = snapshot.seq, "skipping stale snapshot");
            return Ok(false);
        }

        let bytes = self.codec.encode_snapshot(snapshot)?;
        super::replace_file(&self.path, &bytes)?;
        *last = Some(snapshot.seq);

        info!(
            seq = snapshot.seq,
            in_flight = snapshot.in_flight.len(),
            retrying = snapshot.retrying.len(),
            recovered = snapshot.recovered.len(),
            bytes = bytes.len(),
            "wrote snapshot"
        );
        Ok(true)
    }

    /// Loads the snapshot on disk, if any. A leftover temp file from an
    /// interrupted write is removed.
    pub fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let tmp = super::tmp_path(&self.path);
        if tmp.exists() {
            debug!(path = %tmp.display(), "removing leftover snapshot temp file");
            fs::remove_file(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        let snapshot = self.codec.decode_snapshot(&bytes)?;
        *self.last_written.lock() = Some(snapshot.seq);
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LaneKey, RoutingHint, TaskId};
    use crate::persistence::JsonCodec;
    use tempfile::TempDir;
    use ulid::Ulid;
    use url::Url;

    fn task(path: &str) -> ProcessingTask {
        ProcessingTask::seed(
            TaskId::from_ulid(Ulid::new()),
            Url::parse(&format!("https://example.com/{path}")).unwrap(),
            RoutingHint::new("x"),
            Utc::now(),
        )
        .admitted()
    }

    fn state() -> DurableState {
        let mut state = DurableState::default();
        let a = task("a");
        let b = task("b");
        let c = task("c");
        state.in_flight.insert(
            a.id(),
            InFlightEntry {
                task: a,
                lane: LaneKey::new("example.com"),
                started_at: Utc::now(),
            },
        );
        state.retrying.insert(
            b.id(),
            ParkedRetry {
                task: b,
                due: Utc::now(),
            },
        );
        state.recovered.insert(c.id(), c);
        state
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.bin"), Arc::new(JsonCodec));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn written_snapshot_restores_every_open_task() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.bin"), Arc::new(JsonCodec));
        let original = state();

        assert!(store.write(&Snapshot::capture(7, Utc::now(), &original)).unwrap());

        let reopened = SnapshotStore::new(dir.path().join("snapshot.bin"), Arc::new(JsonCodec));
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded.seq, 7);
        assert_eq!(loaded.into_state(), original);
    }

    #[test]
    fn older_snapshot_never_replaces_newer() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.bin"), Arc::new(JsonCodec));
        let now = Utc::now();

        assert!(store.write(&Snapshot::capture(10, now, &state())).unwrap());
        assert!(!store.write(&Snapshot::capture(4, now, &DurableState::default())).unwrap());
        assert!(!store.write(&Snapshot::capture(10, now, &DurableState::default())).unwrap());

        assert_eq!(store.load().unwrap().unwrap().seq, 10);
    }

    #[test]
    fn leftover_temp_file_is_ignored_and_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.bin");
        let store = SnapshotStore::new(&path, Arc::new(JsonCodec));
        store
            .write(&Snapshot::capture(3, Utc::now(), &state()))
            .unwrap();

        let tmp = crate::persistence::tmp_path(&path);
        fs::write(&tmp, b"half a snapsh").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.seq, 3);
        assert!(!tmp.exists());
    }
}
