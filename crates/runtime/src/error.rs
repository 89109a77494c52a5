//! Error types for the session runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// No persisted record exists for the connection id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Transport-level failure (socket, handshake, send).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side reports the session is invalid or duplicated
    /// elsewhere; re-authentication is required.
    #[error("session conflict: re-authentication required")]
    SessionConflict,

    /// Reconnection attempts were exhausted before the transport opened.
    #[error("connection failed after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Reconnect attempts consumed before giving up.
        attempts: u32,
    },

    /// The connection was removed while an operation was in flight.
    #[error("connection removed")]
    Removed,

    /// A deadline elapsed before the operation produced a result.
    #[error("timeout: {0}")]
    Timeout(String),

    /// I/O error from the persistence layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential blob or record (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true if this error requires re-authentication.
    pub fn is_session_conflict(&self) -> bool {
        matches!(self, Error::SessionConflict)
    }

    /// Returns true if the underlying record or connection is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ConnectionNotFound(_) | Error::Removed)
    }
}
