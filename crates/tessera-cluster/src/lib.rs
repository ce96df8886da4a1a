//! Cluster plumbing: the coordinator's membership state machine, the
//! small request/response RPC used between members, and the
//! priority-based leader election.

mod coordinator;
mod election;
mod error;
mod rpc;

pub use coordinator::{Coordinator, CoordinatorService};
pub use election::{decide, higher_priority_peers, ElectionOutcome, Role};
pub use error::ClusterError;
pub use rpc::{send_message, RPC_TIMEOUT};
