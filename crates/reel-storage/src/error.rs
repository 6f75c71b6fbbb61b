//! Storage error types.

use thiserror::Error;

/// Errors produced by graph repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem trouble while reading or writing a stored graph.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A graph id failed shape validation (ids become filenames).
    #[error("invalid graph id: '{0}'")]
    InvalidGraphId(String),

    /// Stored data could not be reassembled into a valid graph.
    #[error("stored graph '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}
