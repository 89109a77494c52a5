//! Persisted connection records.
//!
//! One record exists per connection id. The record is created
//! administratively and mutated by the session lifecycle controller on every
//! state transition; no other component writes `status`, `session`, `qrcode`
//! or `retry_count`.

use serde::{Deserialize, Serialize};

/// Administrative status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// A transport opened successfully and credentials are persisted.
    Active,
    /// No live adapter is registered for this connection.
    #[default]
    Deactive,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Active => write!(f, "active"),
            ConnectionStatus::Deactive => write!(f, "deactive"),
        }
    }
}

/// The durable state of one connection.
///
/// `session` holds the serialized credential blob ([`crate::AuthState`] as
/// JSON with base64-armored byte fields) and is opaque to everything except
/// the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Connection id, assigned administratively.
    pub id: String,

    /// Current administrative status.
    #[serde(default)]
    pub status: ConnectionStatus,

    /// Serialized credential blob, or `None` before first provisioning.
    #[serde(default)]
    pub session: Option<String>,

    /// Last-issued login-code payload, cleared once the transport opens.
    #[serde(default)]
    pub qrcode: Option<String>,

    /// Reconnect attempts consumed within the current attempt chain.
    #[serde(default)]
    pub retry_count: u32,
}

impl ConnectionRecord {
    /// Creates a fresh record for an administratively provisioned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ConnectionStatus::Deactive,
            session: None,
            qrcode: None,
            retry_count: 0,
        }
    }

    /// True if the record carries a stored session blob.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}
