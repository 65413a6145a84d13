//! ProcessingTask - the unit of work flowing through the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use super::TaskId;

/// Free-form hint used by route matchers to pick a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingHint(String);

impl RoutingHint {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a task came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Supplied by the caller before or during the run.
    Seed,

    /// Found in the parsed content of `parent`.
    Discovered { parent: TaskId, depth: u32 },
}

impl TaskOrigin {
    /// Link distance from the seed (seeds are depth 0).
    pub fn depth(&self) -> u32 {
        match self {
            TaskOrigin::Seed => 0,
            TaskOrigin::Discovered { depth, .. } => *depth,
        }
    }
}

/// Dedup key for a task: the target URI without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(uri: &Url) -> Self {
        let mut uri = uri.clone();
        uri.set_fragment(None);
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable crawl task.
///
/// State transitions never mutate a task in place: a retry yields a new value
/// with the same `id` and `attempt + 1`.
///
/// `admitted` records that the task already passed dedup and scope checks.
/// Re-entries (retries, politeness deferrals, recovered tasks) carry it so the
/// scheduler does not discard them as duplicates of themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTask {
    id: TaskId,
    uri: Url,
    hint: RoutingHint,
    origin: TaskOrigin,
    attempt: u32,
    enqueued_at: DateTime<Utc>,
    #[serde(default)]
    admitted: bool,
}

impl ProcessingTask {
    pub fn seed(id: TaskId, uri: Url, hint: RoutingHint, now: DateTime<Utc>) -> Self {
        Self {
            id,
            uri,
            hint,
            origin: TaskOrigin::Seed,
            attempt: 0,
            enqueued_at: now,
            admitted: false,
        }
    }

    /// A task for a link found while processing `parent`. Inherits the hint.
    pub fn discovered(id: TaskId, uri: Url, parent: &ProcessingTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            uri,
            hint: parent.hint.clone(),
            origin: TaskOrigin::Discovered {
                parent: parent.id,
                depth: parent.origin.depth() + 1,
            },
            attempt: 0,
            enqueued_at: now,
            admitted: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn hint(&self) -> &RoutingHint {
        &self.hint
    }

    pub fn origin(&self) -> &TaskOrigin {
        &self.origin
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.uri)
    }

    /// Same task, marked as having passed dedup and scope.
    pub fn admitted(&self) -> Self {
        Self {
            admitted: true,
            ..self.clone()
        }
    }

    /// The value re-queued after a transient failure.
    pub fn next_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: now,
            admitted: true,
            ..self.clone()
        }
    }
}
