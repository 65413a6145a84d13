//! Domain model (IDs, tasks, outcomes, decisions, lifecycle events, errors).

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod lane;
pub mod outcome;
pub mod state;
pub mod task;

pub use decision::{DeadLetterReason, Decider, Decision};
pub use errors::{CrawlError, ErrorKind, PersistenceError};
pub use events::LifecycleEvent;
pub use ids::{ParseIdError, TaskId};
pub use lane::LaneKey;
pub use outcome::{Failure, FailureKind, Outcome};
pub use state::TaskState;
pub use task::{Fingerprint, ProcessingTask, RoutingHint, TaskOrigin};
