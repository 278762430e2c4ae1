//! Error types for the log store.

use thiserror::Error;

use crate::conversation::AttachmentError;

/// Log store error type.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// I/O error while writing logs or images.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Image could not be re-encoded for the artifact.
    #[error("image error: {0}")]
    Image(#[from] AttachmentError),
}

/// Convenience result alias for log store operations.
pub type LogResult<T> = Result<T, LogStoreError>;
