//! Error types for the sync engine.

use crate::crypto::CryptoError;
use recsync_protocol::ProtocolError;
use recsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Tag attached to errors that abort a sync, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Fetching incoming records failed.
    EngineDownloadFail,
    /// Uploading outgoing records failed.
    EngineUploadFail,
    /// The server holds data written by a newer engine version.
    VersionOutOfDate,
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// Status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The transport client reports it is not usable.
    #[error("not connected to server")]
    NotConnected,

    /// Downloading incoming records failed.
    #[error("download of {collection} failed: {source}")]
    Download {
        /// Collection name.
        collection: String,
        /// Underlying failure.
        #[source]
        source: Box<SyncError>,
    },

    /// Uploading outgoing records failed.
    #[error("upload of {collection} failed: {source}")]
    Upload {
        /// Collection name.
        collection: String,
        /// Underlying failure.
        #[source]
        source: Box<SyncError>,
    },

    /// The server's engine version is newer than ours.
    #[error("server has newer data for {collection}: remote version {remote}, local version {local}")]
    ServerAhead {
        /// Collection name.
        collection: String,
        /// Local engine version.
        local: u32,
        /// Version recorded on the server.
        remote: u32,
    },

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Encoding or decoding a protocol value failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Preference storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record store failed.
    #[error("store error: {0}")]
    Store(String),

    /// A command was addressed to a client that is not known.
    #[error("unknown remote client ID: '{0}'")]
    UnknownClient(String),

    /// A command name is not in the command table.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A command was sent with the wrong number of arguments.
    #[error("expected {expected} args for '{command}', but got {got}")]
    InvalidArguments {
        /// Command name.
        command: String,
        /// Declared arity.
        expected: usize,
        /// Arguments supplied.
        got: usize,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Wraps `self` as a download failure of `collection`.
    pub fn into_download(self, collection: &str) -> Self {
        Self::Download {
            collection: collection.to_string(),
            source: Box::new(self),
        }
    }

    /// Wraps `self` as an upload failure of `collection`.
    pub fn into_upload(self, collection: &str) -> Self {
        Self::Upload {
            collection: collection.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns the failure code for errors that abort a sync.
    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            SyncError::Download { .. } => Some(FailureCode::EngineDownloadFail),
            SyncError::Upload { .. } => Some(FailureCode::EngineUploadFail),
            SyncError::ServerAhead { .. } => Some(FailureCode::VersionOutOfDate),
            _ => None,
        }
    }

    /// Returns true if this error aborts the current sync.
    ///
    /// Decryption and decoding failures belong to a single record. When the
    /// store reports one while applying, the engine counts that record as
    /// failed and moves on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::Crypto(_) | SyncError::Protocol(_) | SyncError::Json(_)
        )
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Http { status, .. } => *status >= 500,
            SyncError::Download { source, .. } | SyncError::Upload { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    /// Returns true if this is a decryption integrity failure.
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, SyncError::Crypto(CryptoError::IntegrityMismatch { .. }))
    }
}
