//! Error types for the storage server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the storage server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed path, query or body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request names a user this server does not serve.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No record or route matched.
    #[error("not found: {0}")]
    NotFound(String),

    /// The method is not supported on this route.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// A POST carried more records than the server accepts.
    #[error("too many records: {got} > {max}")]
    TooManyRecords {
        /// Records in the request.
        got: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A failure queued by a test.
    #[error("injected failure with status {0}")]
    Injected(u16),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// Returns the HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Json(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::TooManyRecords { .. } => 413,
            ServerError::Injected(status) => *status,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Injected(503).is_server_error());
        assert!(!ServerError::NotFound("x".into()).is_server_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::TooManyRecords { got: 120, max: 100 };
        assert_eq!(err.status(), 413);
        assert_eq!(err.to_string(), "too many records: 120 > 100");
    }
}
