//! LaneKeyResolver port - maps a task to its politeness lane.

use crate::domain::{LaneKey, ProcessingTask};

pub trait LaneKeyResolver: Send + Sync {
    fn lane_for(&self, task: &ProcessingTask) -> LaneKey;
}
