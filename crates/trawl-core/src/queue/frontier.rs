//! Frontier: FIFO of tasks waiting for a worker.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::ProcessingTask;

/// Pending-task queue shared by all workers.
///
/// `poll` never blocks: an empty frontier returns `None` right away and the
/// caller decides how to idle.
#[derive(Debug, Default)]
pub struct Frontier {
    ready: Mutex<VecDeque<ProcessingTask>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, task: ProcessingTask) {
        self.ready.lock().push_back(task);
    }

    pub fn offer_all(&self, tasks: impl IntoIterator<Item = ProcessingTask>) {
        self.ready.lock().extend(tasks);
    }

    pub fn poll(&self) -> Option<ProcessingTask> {
        self.ready.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }
}
