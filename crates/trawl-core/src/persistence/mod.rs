//! Crash durability for open tasks.
//!
//! Every lifecycle transition is appended to a write-ahead log before the
//! in-memory state changes. Snapshots periodically capture the whole open
//! state so the log can be compacted. At startup the [`StateBootstrapper`]
//! rebuilds the state from the latest snapshot plus the log tail.

mod bootstrap;
mod codec;
mod config;
mod snapshot;
mod state;
mod trigger;
mod wal;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

pub use bootstrap::{RecoveryReport, StateBootstrapper};
pub use codec::{Codec, CodecKind, JsonCodec};
pub use config::{PersistenceConfig, SnapshotPolicy};
pub use snapshot::{Snapshot, SnapshotStore};
pub use state::{DurableState, InFlightEntry, ParkedRetry};
pub use trigger::{AnyOf, EventCountTrigger, IntervalTrigger, Never, SnapshotTrigger};
pub use wal::{scan_file, DurabilityPolicy, ScannedRecord, WalRecord, WalScan, WalWriter};

use crate::domain::PersistenceError;

pub const WAL_FILE: &str = "wal.log";
pub const SNAPSHOT_FILE: &str = "snapshot.bin";
pub const DEAD_LETTER_FILE: &str = "dead_letters.jsonl";

/// Durable state read back from disk.
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    pub state: DurableState,
    pub snapshot_seq: Option<u64>,
    pub replayed: usize,
}

/// The WAL writer and snapshot store for one state directory.
pub struct Persistence {
    config: PersistenceConfig,
    codec: Arc<dyn Codec>,
    wal: WalWriter,
    snapshots: SnapshotStore,
}

impl Persistence {
    pub fn open(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        let codec = config.codec.build();
        Self::open_with_codec(config, codec)
    }

    /// Opens with a codec that is not selectable from configuration.
    pub fn open_with_codec(
        config: PersistenceConfig,
        codec: Arc<dyn Codec>,
    ) -> Result<Self, PersistenceError> {
        fs::create_dir_all(&config.dir).map_err(|e| PersistenceError::io(&config.dir, e))?;

        let snapshots = SnapshotStore::new(config.snapshot_path(), codec.clone());
        let floor_seq = snapshots.load()?.map_or(0, |s| s.seq);
        let wal = WalWriter::open(config.wal_path(), codec.clone(), config.durability, floor_seq)?;

        info!(
            dir = %config.dir.display(),
            codec = codec.name(),
            durability = ?config.durability,
            "opened state directory"
        );
        Ok(Self {
            config,
            codec,
            wal,
            snapshots,
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn wal(&self) -> &WalWriter {
        &self.wal
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Latest snapshot plus every WAL record after it.
    pub fn load(&self) -> Result<LoadedState, PersistenceError> {
        let snapshot = self.snapshots.load()?;
        let snapshot_seq = snapshot.as_ref().map(|s| s.seq);
        let mut state = snapshot.map(Snapshot::into_state).unwrap_or_default();

        let floor = snapshot_seq.unwrap_or(0);
        let mut replayed = 0;
        for scanned in self.wal.scan()?.records {
            if scanned.record.seq > floor {
                state.apply(&scanned.record.event);
                replayed += 1;
            }
        }

        Ok(LoadedState {
            state,
            snapshot_seq,
            replayed,
        })
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `bytes` via temp file, fsync and rename.
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| PersistenceError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))?;
    sync_parent(path)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<(), PersistenceError> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| PersistenceError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<(), PersistenceError> {
    Ok(())
}
