//! Durable open-task state: what the WAL and snapshots describe.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LaneKey, LifecycleEvent, ProcessingTask, TaskId};

/// A task currently being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightEntry {
    pub task: ProcessingTask,
    pub lane: LaneKey,
    pub started_at: DateTime<Utc>,
}

/// A task that failed transiently and waits for `due`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkedRetry {
    pub task: ProcessingTask,
    pub due: DateTime<Utc>,
}

/// Every task that was begun and has not reached a terminal event.
///
/// - `in_flight`: `begin` seen, nothing after it.
/// - `retrying`: last event was `fail-retry`.
/// - `recovered`: was in flight when the process died; re-offered at
///   bootstrap and waiting for its next `begin`.
///
/// A task id is in at most one of the three maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DurableState {
    pub in_flight: BTreeMap<TaskId, InFlightEntry>,
    pub retrying: BTreeMap<TaskId, ParkedRetry>,
    pub recovered: BTreeMap<TaskId, ProcessingTask>,
}

impl DurableState {
    pub fn apply(&mut self, event: &LifecycleEvent) {
        let id = event.task_id();
        self.retrying.remove(&id);
        self.recovered.remove(&id);
        match event {
            LifecycleEvent::Begin { task, lane, at } => {
                self.in_flight.insert(
                    id,
                    InFlightEntry {
                        task: task.clone(),
                        lane: lane.clone(),
                        started_at: *at,
                    },
                );
            }
            LifecycleEvent::FailRetry { task, due, .. } => {
                self.in_flight.remove(&id);
                self.retrying.insert(
                    id,
                    ParkedRetry {
                        task: task.clone(),
                        due: *due,
                    },
                );
            }
            LifecycleEvent::Complete { .. } | LifecycleEvent::FailTerminal { .. } => {
                self.in_flight.remove(&id);
            }
        }
    }

    /// Crash semantics: nothing is in flight after a restart, whatever was
    /// in flight becomes recovered (at-least-once).
    pub fn into_recovered(mut self) -> Self {
        let crashed = std::mem::take(&mut self.in_flight);
        for (id, entry) in crashed {
            self.recovered.insert(id, entry.task);
        }
        self
    }

    pub fn open_count(&self) -> usize {
        self.in_flight.len() + self.retrying.len() + self.recovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_count() == 0
    }
}
