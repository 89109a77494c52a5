//! The caller-facing error taxonomy.
//!
//! Every failure leaving the operation surface is one of these variants, so
//! the boundary layer can map it to a status code without inspecting
//! messages. Runtime errors are folded into this taxonomy at the crate
//! boundary by the `From` impl below.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// One rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the operation gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed input, rejected before any transport call.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Unknown connection or resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session is invalid or duplicated elsewhere; persisted state was
    /// already cleared when this error is observed.
    #[error("session expired, re-authentication required")]
    SessionConflict,

    /// No CONNECTED adapter is available to serve the operation.
    #[error("no active connection")]
    NoActiveConnection,

    /// Provisioning or request deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport-level failure passed through from the adapter.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            details,
        }
    }

    /// Stable machine-readable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::SessionConflict => "session_conflict",
            GatewayError::NoActiveConnection => "no_active_connection",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Transport(_) => "transport_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the boundary layer should respond with.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::SessionConflict | GatewayError::NoActiveConnection => 409,
            GatewayError::Timeout(_) => 504,
            GatewayError::Transport(_) | GatewayError::Internal(_) => 500,
        }
    }

    /// Field-level detail, present only for validation failures.
    pub fn details(&self) -> &[FieldError] {
        match self {
            GatewayError::Validation { details, .. } => details,
            _ => &[],
        }
    }
}

impl From<zap_runtime::Error> for GatewayError {
    fn from(err: zap_runtime::Error) -> Self {
        use zap_runtime::Error as Rt;
        match err {
            Rt::ConnectionNotFound(id) => GatewayError::NotFound(format!("connection {id}")),
            Rt::Removed => GatewayError::NotFound("connection removed".to_string()),
            Rt::SessionConflict => GatewayError::SessionConflict,
            Rt::Timeout(message) => GatewayError::Timeout(message),
            Rt::Transport(message) => GatewayError::Transport(message),
            Rt::RetriesExhausted { .. } => GatewayError::Transport(err.to_string()),
            Rt::Io(_) | Rt::Json(_) => GatewayError::Internal(err.to_string()),
        }
    }
}
