//! A server node: owns one hash range, replicates it to its successors,
//! serves the client text protocol and the cluster's JSON protocol on
//! the same listener, and can take over coordinator duties after an
//! election.

pub mod config;
mod connection;
mod error;
mod heartbeat;
mod node;
mod replication;
mod server;

pub use config::NodeConfig;
pub use error::ServerError;
pub use node::NodeState;
pub use server::{start, NodeHandle};
