//! One live transport bound to one connection id.

use std::sync::Arc;

use tokio::sync::mpsc;
use zap_protocol::{AddParticipantsOptions, CreateGroupOptions, GroupInfo, TransportEvent};

use crate::error::Result;
use crate::store::CredentialStore;
use crate::transport::{KeyProvider, TransportFactory, TransportParts};

/// Facade over one live transport for one connection id.
///
/// Construction injects the stored credentials and a key provider bound to
/// the credential store; the returned event stream belongs to the lifecycle
/// controller. At most one adapter exists per connection id at any instant;
/// the registry enforces this.
pub struct SocketAdapter {
    connection_id: String,
    handle: Arc<dyn crate::transport::TransportHandle>,
}

impl SocketAdapter {
    /// Builds a live transport for `connection_id`, reading stored
    /// credentials and binding a key provider to `store`.
    ///
    /// Returns the adapter, its event stream, and whether stored identity
    /// credentials were injected (no credentials means pairing starts and a
    /// login code will be issued).
    pub async fn connect(
        factory: &dyn TransportFactory,
        store: &Arc<CredentialStore>,
        connection_id: &str,
    ) -> Result<(
        Arc<Self>,
        mpsc::UnboundedReceiver<TransportEvent>,
        bool,
    )> {
        let auth = store.read_auth(connection_id)?;
        let has_credentials = auth.as_ref().is_some_and(|a| a.has_credentials());
        let keys = KeyProvider::new(Arc::clone(store), connection_id);

        let TransportParts { handle, events } = factory.connect(auth, keys).await?;

        let adapter = Arc::new(Self {
            connection_id: connection_id.to_string(),
            handle,
        });
        Ok((adapter, events, has_credentials))
    }

    /// The connection id this adapter serves.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn send_text(&self, group_jid: &str, message: &str) -> Result<()> {
        self.handle.send_text(group_jid, message).await
    }

    pub async fn create_group(&self, options: &CreateGroupOptions) -> Result<GroupInfo> {
        self.handle.create_group(options).await
    }

    pub async fn add_participants(&self, options: &AddParticipantsOptions) -> Result<()> {
        self.handle.add_participants(options).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.handle.logout().await
    }

    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

impl std::fmt::Debug for SocketAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketAdapter")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
