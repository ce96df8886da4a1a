use std::io;

use thiserror::Error;

use tessera_cluster::ClusterError;
use tessera_proto::ProtoError;
use tessera_ring::RingError;
use tessera_store::StoreError;

/// Errors raised while starting or running a node.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("cluster registration rejected by coordinator at {0}")]
    RegistrationRejected(String),
}
