//! Lifecycle events recorded in the write-ahead log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeadLetterReason, LaneKey, ProcessingTask, TaskId};

/// One lifecycle transition for one task identity.
///
/// Events are only ever appended. Per task the order is always `begin` first,
/// then exactly one of `complete`, `fail-retry` or `fail-terminal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    Begin {
        task: ProcessingTask,
        lane: LaneKey,
        at: DateTime<Utc>,
    },

    Complete {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    /// `task` is the value that will be re-queued (attempt already bumped).
    FailRetry {
        task: ProcessingTask,
        due: DateTime<Utc>,
        reason: String,
        at: DateTime<Utc>,
    },

    FailTerminal {
        task_id: TaskId,
        reason: DeadLetterReason,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            LifecycleEvent::Begin { task, .. } | LifecycleEvent::FailRetry { task, .. } => {
                task.id()
            }
            LifecycleEvent::Complete { task_id, .. }
            | LifecycleEvent::FailTerminal { task_id, .. } => *task_id,
        }
    }

    /// Name used in logs, matching the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Begin { .. } => "begin",
            LifecycleEvent::Complete { .. } => "complete",
            LifecycleEvent::FailRetry { .. } => "fail-retry",
            LifecycleEvent::FailTerminal { .. } => "fail-terminal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoutingHint;
    use ulid::Ulid;
    use url::Url;

    #[test]
    fn events_are_tagged_in_kebab_case() {
        let task = ProcessingTask::seed(
            TaskId::from_ulid(Ulid::new()),
            Url::parse("https://example.com/").unwrap(),
            RoutingHint::new("x"),
            Utc::now(),
        );
        let now = Utc::now();
        let retry = LifecycleEvent::FailRetry {
            task: task.next_attempt(now),
            due: now,
            reason: "timeout".into(),
            at: now,
        };
        let v = serde_json::to_value(&retry).unwrap();
        assert_eq!(v["type"], "fail-retry");
        assert_eq!(retry.name(), "fail-retry");
        assert_eq!(retry.task_id(), task.id());

        let done = LifecycleEvent::Complete {
            task_id: task.id(),
            at: now,
        };
        let v = serde_json::to_value(&done).unwrap();
        assert_eq!(v["type"], "complete");
    }
}
