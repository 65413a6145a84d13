//! Stock scope policies.

use std::collections::HashSet;

use crate::domain::ProcessingTask;
use crate::ports::ScopePolicy;

/// Everything is in scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ScopePolicy for AllowAll {
    fn in_scope(&self, _task: &ProcessingTask) -> bool {
        true
    }
}

/// Only tasks whose host is in an allow-list (case-insensitive) are in scope.
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    hosts: HashSet<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl ScopePolicy for HostAllowList {
    fn in_scope(&self, task: &ProcessingTask) -> bool {
        task.uri()
            .host_str()
            .is_some_and(|host| self.hosts.contains(&host.to_ascii_lowercase()))
    }
}
