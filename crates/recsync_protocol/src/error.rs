//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record is structurally valid JSON but violates the record format.
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// Record ID.
        id: String,
        /// What was wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates an invalid record error.
    pub fn invalid_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
