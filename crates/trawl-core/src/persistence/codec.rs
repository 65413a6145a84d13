//! Codec - how WAL records and snapshots become bytes.
//!
//! The on-disk format is a swappable contract. Framing (record boundaries,
//! atomic replacement) is handled by the WAL and snapshot store; a codec only
//! maps one value to one byte string and back.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Snapshot, WalRecord};
use crate::domain::PersistenceError;

pub trait Codec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn encode_record(&self, record: &WalRecord) -> Result<Vec<u8>, PersistenceError>;

    fn decode_record(&self, bytes: &[u8]) -> Result<WalRecord, PersistenceError>;

    fn encode_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<u8>, PersistenceError>;

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<Snapshot, PersistenceError>;
}

/// serde_json encoding. Human-readable, good enough for operator inspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_record(&self, record: &WalRecord) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(record).map_err(|e| PersistenceError::Encode {
            what: "wal record",
            reason: e.to_string(),
        })
    }

    fn decode_record(&self, bytes: &[u8]) -> Result<WalRecord, PersistenceError> {
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode {
            what: "wal record",
            reason: e.to_string(),
        })
    }

    fn encode_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(snapshot).map_err(|e| PersistenceError::Encode {
            what: "snapshot",
            reason: e.to_string(),
        })
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<Snapshot, PersistenceError> {
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode {
            what: "snapshot",
            reason: e.to_string(),
        })
    }
}

/// Codec selection in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}
