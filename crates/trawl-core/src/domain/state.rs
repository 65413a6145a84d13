//! Task lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a task as seen by the scheduler.
///
/// State transitions:
/// - Pending -> InFlight -> Succeeded
/// - Pending -> InFlight -> RetryScheduled -> Pending (until attempts run out)
/// - Pending -> InFlight -> DeadLettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// In the frontier, waiting for a worker.
    Pending,

    /// Being fetched and processed.
    InFlight,

    Succeeded,

    /// Waiting in the retry buffer for its due time.
    RetryScheduled,

    /// Archived in the dead letter queue.
    DeadLettered,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::DeadLettered)
    }
}
