//! Retry policy (backoff + attempt budget) and the due-time ordered retry buffer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{DeadLetterReason, Decider, Decision, Outcome, ProcessingTask};

/// Retry policy for failed tasks.
///
/// Exponential backoff with a cap and downward jitter:
/// `delay = min(max_delay, base_delay * multiplier^attempt) * (1 - u * jitter)`
/// where `u` is uniform in `[0, 1)`. With `jitter = 0` delays are exact.
///
/// Example with base_delay=2s, multiplier=2.0, jitter=0:
/// - first failure (attempt 0): 2s
/// - attempt 1: 4s
/// - attempt 2: 8s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries allowed. A task failing transiently `max_attempts`
    /// times is retried each time and dead-lettered on the next failure.
    pub max_attempts: u32,

    #[serde(rename = "base_delay_ms", with = "crate::serde_ext::millis")]
    pub base_delay: Duration,

    pub multiplier: f64,

    #[serde(rename = "max_delay_ms", with = "crate::serde_ext::millis")]
    pub max_delay: Duration,

    /// Fraction in `[0, 1]` by which a delay may be shortened at random.
    pub jitter: f64,
}

impl RetryPolicy {
    /// 3 retries, 2s base, doubling, capped at 5 minutes, 20% jitter.
    pub fn simple() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.2,
        }
    }

    /// Retry immediately, up to `max_attempts` times. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the retry following a failure of attempt `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 - rand::thread_rng().gen_range(0.0..jitter)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(capped * factor).unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::simple()
    }
}

impl Decider for RetryPolicy {
    fn decide(&self, task: &ProcessingTask, outcome: &Outcome) -> Decision {
        let failure = match outcome {
            Outcome::Success { .. } => return Decision::Success,
            Outcome::Failed(failure) => failure,
        };

        if !failure.is_transient() {
            return Decision::DeadLetter {
                reason: DeadLetterReason::Permanent {
                    detail: failure.reason.clone(),
                },
            };
        }

        if task.attempt() >= self.max_attempts {
            return Decision::DeadLetter {
                reason: DeadLetterReason::MaxAttemptsExceeded {
                    attempts: task.attempt() + 1,
                    last_error: failure.reason.clone(),
                },
            };
        }

        let delay = self.next_delay(task.attempt());
        Decision::Retry {
            delay,
            reason: format!(
                "retry {}/{} after {:?}: {}",
                task.attempt() + 1,
                self.max_attempts,
                delay,
                failure.reason
            ),
        }
    }
}

/// Entry in the retry heap.
///
/// `seq` breaks ties between equal due times in insertion order; the reversed
/// ordering turns `BinaryHeap` into a min-heap on `(due, seq)`.
#[derive(Debug)]
struct RetryEntry {
    due: DateTime<Utc>,
    seq: u64,
    task: ProcessingTask,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct RetryHeap {
    heap: BinaryHeap<RetryEntry>,
    next_seq: u64,
}

/// Tasks waiting for their next eligible time, ordered by due time.
///
/// Holds both retries after transient failures and tasks deferred by a
/// politeness gate.
#[derive(Debug, Default)]
pub struct RetryBuffer {
    inner: Mutex<RetryHeap>,
}

impl RetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, task: ProcessingTask, due: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(RetryEntry { due, seq, task });
    }

    /// Removes and returns every task whose due time is `<= now`, earliest first.
    pub fn poll_due(&self, now: DateTime<Utc>) -> Vec<ProcessingTask> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        while inner.heap.peek().is_some_and(|entry| entry.due <= now) {
            if let Some(entry) = inner.heap.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().heap.peek().map(|entry| entry.due)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}
