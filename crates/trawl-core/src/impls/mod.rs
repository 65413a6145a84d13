//! Stock implementations of the ports (scope policies, lane resolvers).

pub mod lane;
pub mod scope;

pub use self::lane::{HostLaneResolver, SingleLane};
pub use self::scope::{AllowAll, HostAllowList};
