use std::io;

use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed record at line {line}: {text:?}")]
    MalformedRecord { line: usize, text: String },

    #[error("key must not contain ',': {0:?}")]
    InvalidKey(String),

    #[error("unknown cache policy {0:?} (expected FIFO, LRU or LFU)")]
    UnknownPolicy(String),
}
