//! The transport seam.
//!
//! The wire-level protocol client (handshake, key exchange, message
//! encryption) is a black box behind [`TransportFactory`] and
//! [`TransportHandle`]. The runtime injects stored credentials and a
//! [`KeyProvider`] bound to the credential store, and consumes a stream of
//! typed [`TransportEvent`]s in return. No callbacks reach back into the
//! lifecycle machinery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use zap_protocol::{
    AddParticipantsOptions, AuthState, CreateGroupOptions, GroupInfo, KeyKind, KeyMaterial,
    TransportEvent,
};

use crate::error::Result;
use crate::store::CredentialStore;

/// Signal-key access handed to the transport, bound to one connection id.
///
/// The transport reads and writes per-peer session state through this
/// provider during encryption and decryption; it never touches the store
/// directly.
#[derive(Clone)]
pub struct KeyProvider {
    store: Arc<CredentialStore>,
    connection_id: String,
}

impl KeyProvider {
    pub fn new(store: Arc<CredentialStore>, connection_id: impl Into<String>) -> Self {
        Self {
            store,
            connection_id: connection_id.into(),
        }
    }

    /// The connection id this provider is bound to.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Retrieves keys of `kind` for the ids present in the stored
    /// collection.
    pub fn get(&self, kind: KeyKind, ids: &[String]) -> Result<HashMap<String, KeyMaterial>> {
        self.store.get_keys(&self.connection_id, kind, ids)
    }

    /// Merges `entries` into the stored collection for `kind`.
    pub fn set(&self, kind: KeyKind, entries: HashMap<String, KeyMaterial>) -> Result<()> {
        self.store.set_keys(&self.connection_id, kind, entries)
    }
}

/// The live transport halves produced by a successful connect.
pub struct TransportParts {
    /// Command side of the transport.
    pub handle: Arc<dyn TransportHandle>,
    /// Event side of the transport, consumed by the lifecycle controller.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Constructs one live transport per call.
///
/// `auth` carries the stored credential blob when one exists; a transport
/// given `None` (or credentials without a registered identity) must start
/// pairing and emit [`TransportEvent::QrIssued`].
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, auth: Option<AuthState>, keys: KeyProvider) -> Result<TransportParts>;
}

/// Commands accepted by a live transport.
///
/// Implementations must emit [`TransportEvent::CredentialsUpdated`] for any
/// pending credential changes *before* emitting [`TransportEvent::Opened`];
/// a transport that reports open on partially written credentials loses the
/// session on process restart.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Sends a text message to a group jid.
    async fn send_text(&self, group_jid: &str, message: &str) -> Result<()>;

    /// Creates a group and returns its identity.
    async fn create_group(&self, options: &CreateGroupOptions) -> Result<GroupInfo>;

    /// Adds participants to an existing group.
    async fn add_participants(&self, options: &AddParticipantsOptions) -> Result<()>;

    /// Logs the session out remotely, invalidating stored credentials.
    async fn logout(&self) -> Result<()>;

    /// Closes the transport without logging out.
    async fn close(&self) -> Result<()>;
}
