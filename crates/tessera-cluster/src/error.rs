use std::io;

use thiserror::Error;

use tessera_proto::ProtoError;
use tessera_ring::RingError;

/// Errors raised by the cluster layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("peer {0} did not reply in time")]
    Timeout(String),
}
