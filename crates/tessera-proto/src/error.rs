use std::io;

use thiserror::Error;

/// Errors raised while parsing or transporting protocol messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed peer message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed request: {0:?}")]
    MalformedRequest(String),

    #[error("unknown status: {0:?}")]
    UnknownStatus(String),

    #[error("connection closed by peer")]
    Closed,
}
