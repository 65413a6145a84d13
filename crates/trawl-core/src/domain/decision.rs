//! Decision model: what happens to a task after an attempt.
//!
//! This module defines the `Decision` type (what to do next) and the `Decider`
//! trait (how to classify an outcome). The default decider is
//! [`RetryPolicy`](crate::queue::RetryPolicy).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{Outcome, ProcessingTask};

/// Why a task ended up in the dead letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum DeadLetterReason {
    /// The failure itself was classified as permanent.
    Permanent { detail: String },

    /// A transient failure occurred with no retries left.
    MaxAttemptsExceeded { attempts: u32, last_error: String },

    /// No route accepted the task.
    NoRoute,
}

impl DeadLetterReason {
    /// Short stable code for logs and exports.
    pub fn code(&self) -> &'static str {
        match self {
            DeadLetterReason::Permanent { .. } => "permanent",
            DeadLetterReason::MaxAttemptsExceeded { .. } => "max-attempts-exceeded",
            DeadLetterReason::NoRoute => "no-route",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::Permanent { detail } => write!(f, "permanent: {detail}"),
            DeadLetterReason::MaxAttemptsExceeded {
                attempts,
                last_error,
            } => write!(f, "max attempts exceeded after {attempts}: {last_error}"),
            DeadLetterReason::NoRoute => f.write_str("no route matched"),
        }
    }
}

/// The next action to take for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Done. Drop from in-flight.
    Success,

    /// Re-queue after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up and archive.
    DeadLetter { reason: DeadLetterReason },
}

/// Classifies an outcome into a decision.
///
/// Deciders are pure: given the task and the observed outcome they return the
/// next action without side effects. The scheduler executes it.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &ProcessingTask, outcome: &Outcome) -> Decision;
}
