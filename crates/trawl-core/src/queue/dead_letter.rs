//! DeadLetterQueue: terminal-failure archive.
//!
//! - entries are kept in memory for inspection and export
//! - with a [`DeadLetterLog`] every entry is also appended to a JSON-lines
//!   file under the state directory and read back at restore, so the archive
//!   outlives the WAL records that closed the tasks

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{DeadLetterReason, PersistenceError, ProcessingTask};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: ProcessingTask,
    pub reason: DeadLetterReason,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSON-lines file of dead letters.
///
/// A partial last line (crash mid-append) is cut off on open; an unreadable
/// line before it is corruption.
#[derive(Debug)]
pub struct DeadLetterLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DeadLetterLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let (_, valid_len) = read_entries(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;
        let len = file
            .metadata()
            .map_err(|e| PersistenceError::io(&path, e))?
            .len();
        if len > valid_len {
            warn!(path = %path.display(), valid_len, len, "truncating partial dead-letter entry");
            file.set_len(valid_len)
                .and_then(|_| file.sync_all())
                .map_err(|e| PersistenceError::io(&path, e))?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one entry and fsyncs it.
    pub fn append(&self, entry: &DeadLetterEntry) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| PersistenceError::Encode {
            what: "dead letter",
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|e| PersistenceError::io(&self.path, e))
    }

    /// Every complete entry on disk, oldest first.
    pub fn load(&self) -> Result<Vec<DeadLetterEntry>, PersistenceError> {
        let _file = self.file.lock();
        read_entries(&self.path).map(|(entries, _)| entries)
    }
}

/// Parsed entries plus the length of the well-formed prefix.
fn read_entries(path: &Path) -> Result<(Vec<DeadLetterEntry>, u64), PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            // unterminated last line
            break;
        };
        let end = offset + newline;
        let entry = serde_json::from_slice(&bytes[offset..end]).map_err(|e| {
            PersistenceError::Corrupt {
                path: path.to_path_buf(),
                offset: offset as u64,
                reason: e.to_string(),
            }
        })?;
        entries.push(entry);
        offset = end + 1;
    }
    Ok((entries, offset as u64))
}

/// Append-only list of tasks the runtime gave up on.
///
/// The runtime never retries or removes entries; operators inspect or export
/// them.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
    log: Option<DeadLetterLog>,
}

impl DeadLetterQueue {
    /// In-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Journals every entry to `log`.
    pub fn with_log(log: DeadLetterLog) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log: Some(log),
        }
    }

    pub fn log(&self) -> Option<&DeadLetterLog> {
        self.log.as_ref()
    }

    /// Archives a task. With a log the entry is on disk before it becomes
    /// visible; a write failure leaves the queue unchanged.
    pub fn record(
        &self,
        task: ProcessingTask,
        reason: DeadLetterReason,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let entry = DeadLetterEntry {
            task,
            reason,
            recorded_at: now,
        };
        let mut entries = self.entries.lock();
        if let Some(log) = &self.log {
            log.append(&entry)?;
        }
        entries.push(entry);
        Ok(())
    }

    /// Replaces the in-memory entries with the journal contents. Returns the
    /// number of entries loaded (0 without a log).
    pub fn reload(&self) -> Result<usize, PersistenceError> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let loaded = log.load()?;
        let count = loaded.len();
        *self.entries.lock() = loaded;
        debug!(path = %log.path().display(), count, "loaded dead letters");
        Ok(count)
    }

    /// Copy of all entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Writes one JSON object per line.
    pub fn export_jsonl<W: Write>(&self, mut out: W) -> std::io::Result<usize> {
        let entries = self.entries();
        for entry in &entries {
            serde_json::to_writer(&mut out, entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(entries.len())
    }
}
