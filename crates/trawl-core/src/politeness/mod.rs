//! Per-lane politeness: a policy resolves a task to a lane, each lane has a
//! gate enforcing a minimum interval between dispatches.
//!
//! Waiting is advisory. The scheduler re-queues a task that cannot go yet
//! instead of sleeping on it.

mod gate;
mod policy;

pub use gate::{FixedIntervalGate, NoopGate, PolitenessGate};
pub use policy::{GateDecision, GateKind, PolitenessPolicy};
