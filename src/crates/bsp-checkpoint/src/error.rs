//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving or loading checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No blob is stored under the requested key
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bincode encoding or decoding failed
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// The backing store rejected the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored blob failed its integrity check or is otherwise unusable
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Filesystem error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Whether this error means "nothing stored under that key".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound(_))
    }
}
