//! Outcome model: the result of processing one task attempt.
//!
//! This module does not know about queues or persistence. It only defines the
//! shape of results that the retry policy classifies afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Network hiccup, timeout, recoverable parse error.
    Transient,

    /// Policy rejection, non-recoverable content, missing route.
    Permanent,
}

/// A failed attempt with a short machine-friendly reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

/// Result of fetching, parsing and running the pipeline for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Processing finished (either every step continued or a step stopped
    /// early). Carries links to offer back into the frontier.
    Success { discovered: Vec<Url> },

    Failed(Failure),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success {
            discovered: Vec::new(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Outcome::Failed(Failure::transient(reason))
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Outcome::Failed(Failure::permanent(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_serializes_as_upper_case() {
        let s = serde_json::to_string(&FailureKind::Transient).unwrap();
        assert_eq!(s, "\"TRANSIENT\"");
        let s = serde_json::to_string(&FailureKind::Permanent).unwrap();
        assert_eq!(s, "\"PERMANENT\"");
    }

    #[test]
    fn constructors_pick_the_right_kind() {
        assert!(Failure::transient("timeout").is_transient());
        assert!(!Failure::permanent("404").is_transient());
        assert_eq!(
            Outcome::permanent("gone"),
            Outcome::Failed(Failure::permanent("gone"))
        );
    }
}
