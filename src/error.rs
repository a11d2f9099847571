// prolly-seq/src/error.rs

use crate::common::Hash;
use thiserror::Error;

/// Error type for all sequence-engine operations.
#[derive(Error, Debug)]
pub enum ProllyError {
    #[error("chunk not found in store for hash {}", crate::common::fmt_hash(.0))]
    ChunkNotFound(Hash),

    #[error("storage operation failed: {0}")]
    StorageError(String),

    #[error("chunk bytes did not decode as a sequence node: {0}")]
    CorruptChunk(String),

    #[error("bincode serialization/deserialization error: {source}")]
    BincodeError {
        #[from]
        source: bincode::Error,
    },

    #[error("sequence invariant violated: {0}")]
    InvariantViolation(String),

    #[error("collection kind mismatch: {0}")]
    TypeMismatch(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid snapshot file: {0}")]
    InvalidFileFormat(String),

    #[error("checksum mismatch: {context}")]
    ChecksumMismatch { context: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    TaskFailure(String),
}

/// Result type alias for sequence-engine operations.
pub type Result<T> = std::result::Result<T, ProllyError>;

impl From<tokio::task::JoinError> for ProllyError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProllyError::TaskFailure(err.to_string())
    }
}
