//! ScopePolicy port - decides whether a task belongs to this crawl.

use crate::domain::ProcessingTask;

/// Out-of-scope tasks are dropped silently before dispatch.
pub trait ScopePolicy: Send + Sync {
    fn in_scope(&self, task: &ProcessingTask) -> bool;
}

impl<F> ScopePolicy for F
where
    F: Fn(&ProcessingTask) -> bool + Send + Sync,
{
    fn in_scope(&self, task: &ProcessingTask) -> bool {
        self(task)
    }
}
