//! Error types for ring operations.

use crate::Digest;

/// Errors that can occur while working with ring metadata.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// A digest string was not 32 lowercase hex characters.
    #[error("invalid digest '{0}': expected 32 hex characters")]
    InvalidDigest(String),

    /// The named node is not a member of the ring.
    #[error("node {0} not found in ring")]
    NodeNotFound(Digest),

    /// Snapshot (de)serialization failed.
    #[error("ring snapshot serialization: {0}")]
    Snapshot(#[from] serde_json::Error),
}
