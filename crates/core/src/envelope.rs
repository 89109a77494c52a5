//! The JSON response envelope handed to the boundary layer.
//!
//! `{status: "success", data?}` on the happy path,
//! `{status: "error", error, details?}` otherwise. The envelope carries the
//! HTTP status out of band so the boundary layer never parses the body to
//! pick a code.

use serde::Serialize;

use crate::error::{FieldError, GatewayError};

/// Serialized operation outcome plus the HTTP status to respond with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
    #[serde(skip)]
    http_status: u16,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data: Some(data),
            error: None,
            details: None,
            http_status: 200,
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        let details = err.details();
        Self {
            status: "error",
            data: None,
            error: Some(err.to_string()),
            details: if details.is_empty() {
                None
            } else {
                Some(details.to_vec())
            },
            http_status: err.http_status(),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

impl<T: Serialize> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::success(data),
            Err(err) => ApiResponse::error(&err),
        }
    }
}
