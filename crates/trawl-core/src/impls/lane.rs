//! Stock lane key resolvers.

use crate::domain::{LaneKey, ProcessingTask};
use crate::ports::LaneKeyResolver;

/// Lane per `host[:port]`. URIs without a host share the `"-"` lane.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLaneResolver;

impl LaneKeyResolver for HostLaneResolver {
    fn lane_for(&self, task: &ProcessingTask) -> LaneKey {
        let uri = task.uri();
        match (uri.host_str(), uri.port()) {
            (Some(host), Some(port)) => LaneKey::new(format!("{}:{port}", host.to_ascii_lowercase())),
            (Some(host), None) => LaneKey::new(host.to_ascii_lowercase()),
            (None, _) => LaneKey::new("-"),
        }
    }
}

/// Every task in one lane.
#[derive(Debug, Clone)]
pub struct SingleLane(pub LaneKey);

impl LaneKeyResolver for SingleLane {
    fn lane_for(&self, _task: &ProcessingTask) -> LaneKey {
        self.0.clone()
    }
}
