//! Error types for preference storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The preference file could not be parsed.
    #[error("preference file corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    /// Another process holds the preference file lock.
    #[error("preference file is locked by another process")]
    Locked,

    /// A stored value has an unexpected type.
    #[error("preference {key} has type {found}, expected {expected}")]
    TypeMismatch {
        /// The preference key.
        key: String,
        /// The expected JSON type.
        expected: &'static str,
        /// The JSON type actually stored.
        found: &'static str,
    },
}
