//! Lane resolution plus a lazily populated gate cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{FixedIntervalGate, NoopGate, PolitenessGate};
use crate::domain::{LaneKey, ProcessingTask};
use crate::ports::LaneKeyResolver;

/// How a gate is built for a lane seen for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Noop,
    FixedInterval(Duration),
}

impl GateKind {
    /// `FixedInterval` for a positive interval, `Noop` for zero.
    pub fn for_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            GateKind::Noop
        } else {
            GateKind::FixedInterval(interval)
        }
    }

    fn build(self) -> Arc<dyn PolitenessGate> {
        match self {
            GateKind::Noop => Arc::new(NoopGate),
            GateKind::FixedInterval(interval) => Arc::new(FixedIntervalGate::new(interval)),
        }
    }
}

/// Result of consulting the policy for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub lane: LaneKey,
    /// Zero when the task may be dispatched now.
    pub wait: Duration,
}

/// resolve lane -> get or create gate -> query wait time.
///
/// Gates live for the whole run. Creation goes through the map's entry API so
/// two workers meeting a new lane at once end up sharing one gate.
pub struct PolitenessPolicy {
    resolver: Arc<dyn LaneKeyResolver>,
    kind: GateKind,
    gates: DashMap<LaneKey, Arc<dyn PolitenessGate>>,
}

impl PolitenessPolicy {
    pub fn new(resolver: Arc<dyn LaneKeyResolver>, kind: GateKind) -> Self {
        Self {
            resolver,
            kind,
            gates: DashMap::new(),
        }
    }

    pub fn lane_for(&self, task: &ProcessingTask) -> LaneKey {
        self.resolver.lane_for(task)
    }

    pub fn try_acquire(&self, lane: &LaneKey, now: DateTime<Utc>) -> Duration {
        self.gate(lane).try_acquire(now)
    }

    pub fn check(&self, task: &ProcessingTask, now: DateTime<Utc>) -> GateDecision {
        let lane = self.lane_for(task);
        let wait = self.try_acquire(&lane, now);
        GateDecision { lane, wait }
    }

    /// Number of lanes seen so far.
    pub fn lanes(&self) -> usize {
        self.gates.len()
    }

    fn gate(&self, lane: &LaneKey) -> Arc<dyn PolitenessGate> {
        if let Some(gate) = self.gates.get(lane) {
            return Arc::clone(gate.value());
        }
        let kind = self.kind;
        Arc::clone(
            self.gates
                .entry(lane.clone())
                .or_insert_with(|| kind.build())
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoutingHint, TaskId};
    use crate::impls::HostLaneResolver;
    use chrono::TimeZone;
    use ulid::Ulid;
    use url::Url;

    fn task(uri: &str) -> ProcessingTask {
        ProcessingTask::seed(
            TaskId::from_ulid(Ulid::new()),
            Url::parse(uri).unwrap(),
            RoutingHint::new("x"),
            Utc::now(),
        )
    }

    #[test]
    fn lanes_are_throttled_independently() {
        let policy = PolitenessPolicy::new(
            Arc::new(HostLaneResolver),
            GateKind::FixedInterval(Duration::from_secs(1)),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let a1 = policy.check(&task("https://a.example/1"), now);
        let a2 = policy.check(&task("https://a.example/2"), now);
        let b1 = policy.check(&task("https://b.example/1"), now);

        assert_eq!(a1.lane.as_str(), "a.example");
        assert!(a1.wait.is_zero());
        assert_eq!(a2.wait, Duration::from_secs(1));
        assert!(b1.wait.is_zero());
        assert_eq!(policy.lanes(), 2);
    }

    #[test]
    fn zero_interval_means_noop() {
        assert_eq!(GateKind::for_interval(Duration::ZERO), GateKind::Noop);
        let policy = PolitenessPolicy::new(Arc::new(HostLaneResolver), GateKind::Noop);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(policy.check(&task("https://a.example/"), now).wait.is_zero());
        }
    }
}
