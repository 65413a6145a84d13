//! In-flight buffer - the set of tasks currently being processed, backed by
//! the write-ahead log.
//!
//! Each transition is appended to the WAL before the in-memory state changes,
//! under the buffer lock, so a snapshot taken under the same lock always
//! matches the log position it is tagged with.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::domain::{
    CrawlError, DeadLetterReason, LaneKey, LifecycleEvent, ProcessingTask, TaskId,
};
use crate::persistence::{DurableState, InFlightEntry, Persistence, Snapshot, SnapshotTrigger};
use crate::ports::Clock;

/// How a failed in-flight task leaves the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Parked until `due`; `task` carries the incremented attempt.
    Retry {
        task: ProcessingTask,
        due: DateTime<Utc>,
        reason: String,
    },
    Terminal {
        reason: DeadLetterReason,
    },
}

struct Inner {
    state: DurableState,
    trigger: Box<dyn SnapshotTrigger>,
}

pub struct InFlightBuffer {
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl InFlightBuffer {
    pub fn new(persistence: Arc<Persistence>, clock: Arc<dyn Clock>) -> Self {
        let trigger = persistence.config().snapshot.build(clock.now());
        Self {
            persistence,
            clock,
            inner: Mutex::new(Inner {
                state: DurableState::default(),
                trigger,
            }),
        }
    }

    pub fn persistence(&self) -> &Arc<Persistence> {
        &self.persistence
    }

    /// Marks `task` as in flight on `lane`.
    pub fn begin(&self, task: &ProcessingTask, lane: LaneKey) -> Result<(), CrawlError> {
        let now = self.clock.now();
        let event = LifecycleEvent::Begin {
            task: task.clone(),
            lane,
            at: now,
        };
        self.record(event, now).map(|_| ())
    }

    /// Removes a successfully processed task. Returns `false` (and writes
    /// nothing) if the task was not in flight.
    pub fn complete(&self, task_id: TaskId) -> Result<bool, CrawlError> {
        let now = self.clock.now();
        self.record(LifecycleEvent::Complete { task_id, at: now }, now)
    }

    /// Removes a failed task, recording whether it will be retried.
    pub fn fail(&self, task_id: TaskId, outcome: FailOutcome) -> Result<bool, CrawlError> {
        let now = self.clock.now();
        let event = match outcome {
            FailOutcome::Retry { task, due, reason } => {
                debug_assert_eq!(task.id(), task_id);
                LifecycleEvent::FailRetry {
                    task,
                    due,
                    reason,
                    at: now,
                }
            }
            FailOutcome::Terminal { reason } => LifecycleEvent::FailTerminal {
                task_id,
                reason,
                at: now,
            },
        };
        self.record(event, now)
    }

    /// Periodic housekeeping: flushes an overdue WAL batch and takes a
    /// snapshot if the trigger says so.
    pub fn maintain(&self) -> Result<(), CrawlError> {
        let now = self.clock.now();
        let snapshot = {
            let mut inner = self.inner.lock();
            self.persistence.wal().flush_if_due(now).map_err(|e| {
                error!(error = %e, "write-ahead log flush failed");
                CrawlError::from(e)
            })?;
            self.snapshot_if_due(&mut inner, now)
        };
        if let Some(snapshot) = snapshot {
            self.write_snapshot(snapshot);
        }
        Ok(())
    }

    /// Forces buffered WAL events to disk.
    pub fn flush(&self) -> Result<(), CrawlError> {
        let _inner = self.inner.lock();
        self.persistence.wal().flush().map_err(|e| {
            error!(error = %e, "write-ahead log flush failed");
            CrawlError::from(e)
        })
    }

    /// Takes a snapshot now, regardless of the trigger. Failure is logged and
    /// reported as `false`.
    pub fn snapshot_now(&self) -> bool {
        let now = self.clock.now();
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.trigger.reset(now);
            Snapshot::capture(self.persistence.wal().last_seq(), now, &inner.state)
        };
        self.write_snapshot(snapshot)
    }

    /// Replaces the durable state. Used once, by the bootstrapper.
    pub fn install(&self, state: DurableState) {
        self.inner.lock().state = state;
    }

    /// Copy of the open-task state.
    pub fn durable_state(&self) -> DurableState {
        self.inner.lock().state.clone()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.inner.lock().state.in_flight.contains_key(&task_id)
    }

    pub fn entries(&self) -> Vec<InFlightEntry> {
        self.inner.lock().state.in_flight.values().cloned().collect()
    }

    /// Tasks currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In flight, parked for retry, or recovered and not yet re-begun.
    pub fn open_count(&self) -> usize {
        self.inner.lock().state.open_count()
    }

    fn record(&self, event: LifecycleEvent, now: DateTime<Utc>) -> Result<bool, CrawlError> {
        let snapshot = {
            let mut inner = self.inner.lock();
            let id = event.task_id();
            let known = match &event {
                LifecycleEvent::Begin { .. } => true,
                _ => inner.state.in_flight.contains_key(&id),
            };
            if !known {
                warn!(task = %id, event = event.name(), "task is not in flight, ignoring");
                return Ok(false);
            }

            let seq = self.persistence.wal().append(&event, now).map_err(|e| {
                error!(task = %id, event = event.name(), error = %e, "write-ahead log append failed");
                CrawlError::from(e)
            })?;
            inner.state.apply(&event);
            inner.trigger.record_event();
            debug!(task = %id, event = event.name(), seq, "recorded transition");

            self.snapshot_if_due(&mut inner, now)
        };

        if let Some(snapshot) = snapshot {
            self.write_snapshot(snapshot);
        }
        Ok(true)
    }

    fn snapshot_if_due(&self, inner: &mut Inner, now: DateTime<Utc>) -> Option<Snapshot> {
        if !inner.trigger.is_due(now) {
            return None;
        }
        inner.trigger.reset(now);
        Some(Snapshot::capture(
            self.persistence.wal().last_seq(),
            now,
            &inner.state,
        ))
    }

    fn write_snapshot(&self, snapshot: Snapshot) -> bool {
        match self.persistence.snapshots().write(&snapshot) {
            Ok(true) => {
                if let Err(e) = self.persistence.wal().compact_through(snapshot.seq) {
                    warn!(seq = snapshot.seq, error = %e, "write-ahead log compaction failed");
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(seq = snapshot.seq, error = %e, "snapshot write failed, continuing");
                false
            }
        }
    }
}
