//! Write-ahead log.
//!
//! Layout: a single append-only file of frames, each frame being a
//! little-endian `u32` payload length followed by one codec-encoded
//! [`WalRecord`]. Sequence numbers increase strictly and are assigned under the
//! writer lock, so the file order is the causal order of transitions.
//!
//! A crash in the middle of an append leaves a torn final frame. Opening the
//! log truncates it with a warning; damage anywhere before the tail is
//! reported as corruption instead.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Codec;
use crate::domain::{LifecycleEvent, PersistenceError};
use crate::ports::clock::between;

const HEADER_LEN: usize = 4;
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub event: LifecycleEvent,
}

/// When buffered WAL frames reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurabilityPolicy {
    /// Write and fsync every event before it becomes visible.
    Immediate,

    /// Flush once `max_events` are buffered or the oldest buffered event is
    /// `max_delay` old, whichever comes first. Up to `max_events` events can
    /// be lost in a crash.
    Batched {
        max_events: usize,
        #[serde(rename = "max_delay_ms", with = "crate::serde_ext::millis")]
        max_delay: Duration,
    },
}

impl Default for DurabilityPolicy {
    fn default() -> Self {
        DurabilityPolicy::Immediate
    }
}

/// One decoded frame and where it sits in the file.
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub offset: u64,
    pub end: u64,
    pub record: WalRecord,
}

/// Result of reading a log file front to back.
#[derive(Debug, Clone, Default)]
pub struct WalScan {
    pub records: Vec<ScannedRecord>,
    /// Length of the well-formed prefix.
    pub valid_len: u64,
    /// Set when a torn final frame was found after `valid_len`.
    pub torn: Option<String>,
}

impl WalScan {
    pub fn last_seq(&self) -> Option<u64> {
        self.records.last().map(|r| r.record.seq)
    }

    pub fn into_records(self) -> Vec<WalRecord> {
        self.records.into_iter().map(|r| r.record).collect()
    }
}

/// Reads a log file. A missing file is an empty log.
pub fn scan_file(path: &Path, codec: &dyn Codec) -> Result<WalScan, PersistenceError> {
    let bytes = read_or_empty(path)?;
    scan_bytes(path, &bytes, codec)
}

fn read_or_empty(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

fn scan_bytes(path: &Path, bytes: &[u8], codec: &dyn Codec) -> Result<WalScan, PersistenceError> {
    let total = bytes.len();
    let mut scan = WalScan::default();
    let mut offset = 0usize;
    let mut last_seq = 0u64;

    while offset < total {
        let corrupt = |reason: String| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            offset: offset as u64,
            reason,
        };

        if total - offset < HEADER_LEN {
            scan.torn = Some(format!("{} trailing header bytes", total - offset));
            break;
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[offset..offset + HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;
        let end = offset + HEADER_LEN + len;

        // no writer emits such a frame, so a bad header is damage even at the tail
        if len > MAX_RECORD_LEN {
            return Err(corrupt(format!("frame length {len} exceeds limit")));
        }
        if end > total {
            scan.torn = Some(format!(
                "frame of {len} bytes runs past end of file ({} available)",
                total - offset - HEADER_LEN
            ));
            break;
        }

        match codec.decode_record(&bytes[offset + HEADER_LEN..end]) {
            Ok(record) => {
                if record.seq <= last_seq {
                    return Err(corrupt(format!(
                        "sequence {} does not follow {last_seq}",
                        record.seq
                    )));
                }
                last_seq = record.seq;
                scan.records.push(ScannedRecord {
                    offset: offset as u64,
                    end: end as u64,
                    record,
                });
            }
            Err(e) if end == total => {
                scan.torn = Some(e.to_string());
                break;
            }
            Err(e) => return Err(corrupt(e.to_string())),
        }
        offset = end;
    }

    scan.valid_len = offset as u64;
    Ok(scan)
}

struct WalInner {
    file: File,
    buffer: Vec<u8>,
    pending: usize,
    oldest_pending: Option<DateTime<Utc>>,
    last_seq: u64,
}

/// Single writer for the log. All appends are serialized by one mutex.
pub struct WalWriter {
    path: PathBuf,
    codec: Arc<dyn Codec>,
    policy: DurabilityPolicy,
    inner: Mutex<WalInner>,
}

impl WalWriter {
    /// Opens (or creates) the log at `path`, truncating a torn tail.
    ///
    /// New records continue after the larger of the last record in the file
    /// and `floor_seq` (the sequence covered by the latest snapshot, which
    /// matters once compaction has emptied the file).
    pub fn open(
        path: impl Into<PathBuf>,
        codec: Arc<dyn Codec>,
        policy: DurabilityPolicy,
        floor_seq: u64,
    ) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let scan = scan_file(&path, codec.as_ref())?;
        let file = open_append(&path)?;
        if let Some(reason) = &scan.torn {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                reason = %reason,
                "truncating torn tail of write-ahead log"
            );
            file.set_len(scan.valid_len)
                .and_then(|_| file.sync_all())
                .map_err(|e| PersistenceError::io(&path, e))?;
        }

        let last_seq = scan.last_seq().unwrap_or(0).max(floor_seq);
        debug!(path = %path.display(), records = scan.records.len(), last_seq, "opened write-ahead log");

        Ok(Self {
            path,
            codec,
            policy,
            inner: Mutex::new(WalInner {
                file,
                buffer: Vec::new(),
                pending: 0,
                oldest_pending: None,
                last_seq,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> DurabilityPolicy {
        self.policy
    }

    /// Sequence number of the last appended record (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().last_seq
    }

    /// Appends one event and returns its sequence number.
    ///
    /// Under `Immediate` the record is on disk when this returns. Under
    /// `Batched` it may still be buffered.
    pub fn append(&self, event: &LifecycleEvent, now: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let mut inner = self.inner.lock();
        let seq = inner.last_seq + 1;
        let payload = self.codec.encode_record(&WalRecord {
            seq,
            event: event.clone(),
        })?;
        if payload.len() > MAX_RECORD_LEN {
            return Err(PersistenceError::Encode {
                what: "wal record",
                reason: format!("{} bytes exceeds the frame limit", payload.len()),
            });
        }

        inner
            .buffer
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        inner.buffer.extend_from_slice(&payload);
        inner.pending += 1;
        inner.oldest_pending.get_or_insert(now);
        inner.last_seq = seq;

        if self.flush_due(&inner, now) {
            self.flush_locked(&mut inner)?;
        }
        Ok(seq)
    }

    /// Flushes a batch whose delay bound has passed.
    pub fn flush_if_due(&self, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        if self.flush_due(&inner, now) {
            self.flush_locked(&mut inner)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)
    }

    /// Number of events buffered but not yet on disk.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending
    }

    /// Flushes, then reads back everything on disk.
    pub fn scan(&self) -> Result<WalScan, PersistenceError> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;
        scan_file(&self.path, self.codec.as_ref())
    }

    /// Drops every record with `seq <= through` by atomically rewriting the
    /// log. Returns the number of records dropped.
    pub fn compact_through(&self, through: u64) -> Result<usize, PersistenceError> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;

        let bytes = read_or_empty(&self.path)?;
        let scan = scan_bytes(&self.path, &bytes, self.codec.as_ref())?;
        let dropped = scan
            .records
            .iter()
            .take_while(|r| r.record.seq <= through)
            .count();
        if dropped == 0 {
            return Ok(0);
        }

        let mut kept = Vec::with_capacity(bytes.len());
        for r in &scan.records[dropped..] {
            kept.extend_from_slice(&bytes[r.offset as usize..r.end as usize]);
        }
        super::replace_file(&self.path, &kept)?;
        inner.file = open_append(&self.path)?;

        debug!(path = %self.path.display(), dropped, kept = scan.records.len() - dropped, "compacted write-ahead log");
        Ok(dropped)
    }

    fn flush_due(&self, inner: &WalInner, now: DateTime<Utc>) -> bool {
        if inner.pending == 0 {
            return false;
        }
        match self.policy {
            DurabilityPolicy::Immediate => true,
            DurabilityPolicy::Batched {
                max_events,
                max_delay,
            } => {
                inner.pending >= max_events
                    || inner
                        .oldest_pending
                        .is_some_and(|oldest| between(oldest, now) >= max_delay)
            }
        }
    }

    fn flush_locked(&self, inner: &mut WalInner) -> Result<(), PersistenceError> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        inner
            .file
            .write_all(&inner.buffer)
            .and_then(|_| inner.file.sync_data())
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        inner.buffer.clear();
        inner.pending = 0;
        inner.oldest_pending = None;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, PersistenceError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistenceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LaneKey, ProcessingTask, RoutingHint, TaskId};
    use crate::persistence::JsonCodec;
    use tempfile::TempDir;
    use ulid::Ulid;
    use url::Url;

    fn begin(path: &str) -> LifecycleEvent {
        LifecycleEvent::Begin {
            task: ProcessingTask::seed(
                TaskId::from_ulid(Ulid::new()),
                Url::parse(&format!("https://example.com/{path}")).unwrap(),
                RoutingHint::new("x"),
                Utc::now(),
            ),
            lane: LaneKey::new("example.com"),
            at: Utc::now(),
        }
    }

    fn open(dir: &TempDir, policy: DurabilityPolicy) -> WalWriter {
        WalWriter::open(dir.path().join("wal.log"), Arc::new(JsonCodec), policy, 0).unwrap()
    }

    #[test]
    fn immediate_appends_are_readable_right_away() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir, DurabilityPolicy::Immediate);

        assert_eq!(wal.append(&begin("a"), Utc::now()).unwrap(), 1);
        assert_eq!(wal.append(&begin("b"), Utc::now()).unwrap(), 2);
        assert_eq!(wal.pending(), 0);

        let scan = scan_file(wal.path(), &JsonCodec).unwrap();
        let seqs: Vec<u64> = scan.records.iter().map(|r| r.record.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(scan.torn.is_none());
    }

    #[test]
    fn batched_appends_flush_on_count() {
        let dir = TempDir::new().unwrap();
        let wal = open(
            &dir,
            DurabilityPolicy::Batched {
                max_events: 3,
                max_delay: Duration::from_secs(60),
            },
        );
        let now = Utc::now();

        wal.append(&begin("a"), now).unwrap();
        wal.append(&begin("b"), now).unwrap();
        assert_eq!(wal.pending(), 2);
        assert!(scan_file(wal.path(), &JsonCodec).unwrap().records.is_empty());

        wal.append(&begin("c"), now).unwrap();
        assert_eq!(wal.pending(), 0);
        assert_eq!(scan_file(wal.path(), &JsonCodec).unwrap().records.len(), 3);
    }

    #[test]
    fn batched_appends_flush_on_delay() {
        let dir = TempDir::new().unwrap();
        let wal = open(
            &dir,
            DurabilityPolicy::Batched {
                max_events: 100,
                max_delay: Duration::from_millis(500),
            },
        );
        let t0 = Utc::now();

        wal.append(&begin("a"), t0).unwrap();
        wal.flush_if_due(t0 + chrono::Duration::milliseconds(100)).unwrap();
        assert_eq!(wal.pending(), 1);

        wal.flush_if_due(t0 + chrono::Duration::milliseconds(500)).unwrap();
        assert_eq!(wal.pending(), 0);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = open(&dir, DurabilityPolicy::Immediate);
            wal.append(&begin("a"), Utc::now()).unwrap();
            wal.append(&begin("b"), Utc::now()).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            // a frame header promising more bytes than were written
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&200u32.to_le_bytes()).unwrap();
            f.write_all(b"{\"seq\":3").unwrap();
        }

        let scan = scan_file(&path, &JsonCodec).unwrap();
        assert!(scan.torn.is_some());
        assert_eq!(scan.records.len(), 2);

        let wal = open(&dir, DurabilityPolicy::Immediate);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(wal.last_seq(), 2);
        assert_eq!(wal.append(&begin("c"), Utc::now()).unwrap(), 3);
        assert_eq!(scan_file(&path, &JsonCodec).unwrap().records.len(), 3);
    }

    #[test]
    fn damage_before_the_tail_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = open(&dir, DurabilityPolicy::Immediate);
            wal.append(&begin("a"), Utc::now()).unwrap();
            wal.append(&begin("b"), Utc::now()).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN] = b'#';
        fs::write(&path, &bytes).unwrap();

        let err = scan_file(&path, &JsonCodec).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn damaged_frame_header_is_corruption_not_a_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = open(&dir, DurabilityPolicy::Immediate);
            for p in ["a", "b", "c"] {
                wal.append(&begin(p), Utc::now()).unwrap();
            }
        }
        let mut bytes = fs::read(&path).unwrap();
        let intact = bytes.len() as u64;
        bytes[..HEADER_LEN].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let err = scan_file(&path, &JsonCodec).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { offset: 0, .. }));

        let reopened = WalWriter::open(
            path.clone(),
            Arc::new(JsonCodec),
            DurabilityPolicy::Immediate,
            0,
        );
        assert!(matches!(reopened, Err(PersistenceError::Corrupt { .. })));
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
    }

    #[test]
    fn compaction_keeps_only_newer_records() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir, DurabilityPolicy::Immediate);
        for p in ["a", "b", "c", "d"] {
            wal.append(&begin(p), Utc::now()).unwrap();
        }

        assert_eq!(wal.compact_through(2).unwrap(), 2);
        assert_eq!(wal.compact_through(2).unwrap(), 0);

        wal.append(&begin("e"), Utc::now()).unwrap();
        let seqs: Vec<u64> = wal
            .scan()
            .unwrap()
            .records
            .iter()
            .map(|r| r.record.seq)
            .collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn floor_seq_continues_numbering_after_empty_log() {
        let dir = TempDir::new().unwrap();
        let wal = WalWriter::open(
            dir.path().join("wal.log"),
            Arc::new(JsonCodec),
            DurabilityPolicy::Immediate,
            41,
        )
        .unwrap();
        assert_eq!(wal.append(&begin("a"), Utc::now()).unwrap(), 42);
    }

    #[test]
    fn durability_policy_reads_from_config() {
        let p: DurabilityPolicy =
            serde_json::from_str(r#"{"mode":"batched","max_events":64,"max_delay_ms":250}"#)
                .unwrap();
        assert_eq!(
            p,
            DurabilityPolicy::Batched {
                max_events: 64,
                max_delay: Duration::from_millis(250)
            }
        );
        let p: DurabilityPolicy = serde_json::from_str(r#"{"mode":"immediate"}"#).unwrap();
        assert_eq!(p, DurabilityPolicy::Immediate);
    }
}
