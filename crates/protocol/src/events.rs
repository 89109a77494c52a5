//! Typed events emitted by a live transport.
//!
//! The underlying protocol client surfaces its callback-style notifications
//! as a stream of these events. The session lifecycle controller is the only
//! consumer; it drives the per-connection state machine from them.

use serde::{Deserialize, Serialize};

use crate::auth::AuthState;

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// Transient network or server-side loss; eligible for reconnection.
    ConnectionLost,
    /// The remote side reports the session is invalid or in use elsewhere.
    SessionConflict,
    /// The session was logged out deliberately.
    LoggedOut,
    /// The transport itself failed with an unclassified error.
    TransportFailure(String),
}

impl CloseReason {
    /// True for closures that must not be retried with the same credentials.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloseReason::SessionConflict | CloseReason::LoggedOut)
    }
}

/// One notification from the transport to the lifecycle controller.
///
/// Ordering matters: a transport must emit `CredentialsUpdated` for any
/// pending credential changes before it emits `Opened`, so credentials are
/// durably saved before the session is reported usable.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A scannable login-code payload was issued for pairing.
    QrIssued { payload: String },
    /// Stored or refreshed credentials must be persisted.
    CredentialsUpdated(Box<AuthState>),
    /// The transport is open and the session is usable.
    Opened,
    /// The transport closed.
    Closed { reason: CloseReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_reasons() {
        assert!(CloseReason::SessionConflict.is_terminal());
        assert!(CloseReason::LoggedOut.is_terminal());
        assert!(!CloseReason::ConnectionLost.is_terminal());
        assert!(!CloseReason::TransportFailure("eof".to_string()).is_terminal());
    }
}
