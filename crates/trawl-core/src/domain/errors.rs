//! Errors and their operational classification.
//!
//! Task-level failures never surface here: they are resolved into retry or
//! dead-letter inside the scheduler loop. What remains are infrastructure
//! failures (the WAL cannot be written) and startup problems.

use std::path::PathBuf;

use thiserror::Error;

/// Operational classification of an error.
///
/// - Transient: retrying the same operation may succeed.
/// - Permanent: retrying is pointless.
/// - Infrastructure: persistence is broken; the runner must halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Failures of the WAL or snapshot store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("corrupt log {path} at byte {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level runtime error.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("route '{0}' is already registered")]
    DuplicateRoute(String),

    #[error("no routes registered; at least one route (or a catch-all) is required")]
    NoRoutes,

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl CrawlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Persistence(_) | CrawlError::Worker(_) => ErrorKind::Infrastructure,
            CrawlError::Config(_) | CrawlError::DuplicateRoute(_) | CrawlError::NoRoutes => {
                ErrorKind::Permanent
            }
        }
    }
}
