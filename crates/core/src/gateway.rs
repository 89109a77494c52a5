//! The public operation surface consumed by the boundary layer.
//!
//! Every operation validates its input first, then resolves a usable
//! connection through the registry, then delegates to the adapter. The
//! gateway never retries on its own: each failure surfaces immediately as a
//! typed [`GatewayError`] so the boundary layer decides what to do next.
//!
//! A session conflict reported by the transport clears persisted state
//! synchronously before the error propagates, so the store never claims
//! `active` while the real session is dead.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use zap_protocol::{
    AddParticipantsOptions, ConnectionRecord, ConnectionStatus, CreateGroupOptions, GroupInfo,
};
use zap_runtime::{
    ConnectionRegistry, CredentialStore, ProvisioningBoard, ProvisioningOutcome,
    SessionLifecycleController, SocketAdapter, TicketFailure,
};

use crate::error::{GatewayError, Result};
use crate::validation;

/// Outcome of a QR retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct QrResponse {
    /// Scannable login-code payload, absent when already connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qrcode: Option<String>,
    pub connected: bool,
}

/// Outcome of a campaign fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    /// Group jids the message was delivered to, in send order.
    pub delivered: Vec<String>,
}

/// Public operations over the session runtime.
pub struct OperationGateway {
    store: Arc<CredentialStore>,
    registry: Arc<ConnectionRegistry>,
    board: Arc<ProvisioningBoard>,
    controller: Arc<SessionLifecycleController>,
}

impl OperationGateway {
    pub fn new(
        store: Arc<CredentialStore>,
        registry: Arc<ConnectionRegistry>,
        board: Arc<ProvisioningBoard>,
        controller: Arc<SessionLifecycleController>,
    ) -> Self {
        Self {
            store,
            registry,
            board,
            controller,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the current or next login-code payload for `id`, spawning a
    /// lifecycle task if none is live.
    ///
    /// This is the only operation that suspends, and it suspends only on
    /// its own provisioning ticket, never on a shared lock.
    pub async fn get_qr_code(&self, id: &str) -> Result<QrResponse> {
        if self.store.load(id)?.is_none() {
            return Err(GatewayError::NotFound(format!("connection {id}")));
        }
        if self.registry.connected(id).is_some() {
            return Ok(QrResponse {
                qrcode: None,
                connected: true,
            });
        }

        self.controller.ensure(id)?;
        let timeout = self.controller.config().provisioning_timeout;
        match self.board.wait(id, timeout).await? {
            ProvisioningOutcome::LoginCode(payload) => Ok(QrResponse {
                qrcode: Some(payload),
                connected: false,
            }),
            ProvisioningOutcome::Open => Ok(QrResponse {
                qrcode: None,
                connected: true,
            }),
        }
    }

    /// Logs the session out, closes the transport, and deletes the record.
    pub async fn remove_connection(&self, id: &str) -> Result<()> {
        if self.store.load(id)?.is_none() {
            return Err(GatewayError::NotFound(format!("connection {id}")));
        }

        // Invalidate the lifecycle claim before touching the store, so a
        // reconnect scheduled during a retry delay cannot resurrect the
        // connection after deletion.
        let entry = self.registry.revoke(id);
        if let Some(adapter) = entry.and_then(|e| e.adapter) {
            if let Err(e) = adapter.logout().await {
                warn!(connection = %id, error = %e, "logout failed during removal");
            }
            if let Err(e) = adapter.close().await {
                warn!(connection = %id, error = %e, "close failed during removal");
            }
        }

        self.board.reject(id, TicketFailure::Removed);
        self.board.remove(id);
        self.store.delete(id)?;
        info!(connection = %id, "connection removed");
        Ok(())
    }

    /// Creates a group through the single active adapter.
    pub async fn create_group(&self, options: &CreateGroupOptions) -> Result<GroupInfo> {
        validation::validate_create_group(options)?;
        let adapter = self.active_adapter()?;
        match adapter.create_group(options).await {
            Ok(group) => {
                info!(group = %group.id, "group created");
                Ok(group)
            }
            Err(e) => Err(self.adapter_failure(&adapter, e)),
        }
    }

    /// Adds participants to an existing group through the active adapter.
    pub async fn add_participants(&self, options: &AddParticipantsOptions) -> Result<()> {
        validation::validate_add_participants(options)?;
        let adapter = self.active_adapter()?;
        match adapter.add_participants(options).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.adapter_failure(&adapter, e)),
        }
    }

    /// Sends `message` once per target group, sequentially, against the
    /// single active adapter.
    ///
    /// The first failure aborts the fan-out; groups already delivered to
    /// are not retried or rolled back.
    pub async fn send_campaign(&self, message: &str, groups: &[String]) -> Result<CampaignReport> {
        validation::validate_campaign(message, groups)?;
        let adapter = self.active_adapter()?;

        let mut delivered = Vec::with_capacity(groups.len());
        for group in groups {
            if let Err(e) = adapter.send_text(group, message).await {
                warn!(group = %group, sent = delivered.len(), "campaign send failed");
                return Err(self.adapter_failure(&adapter, e));
            }
            delivered.push(group.clone());
        }

        info!(sent = delivered.len(), "campaign delivered");
        Ok(CampaignReport { delivered })
    }

    /// Creates the record for `id` if absent and spawns its lifecycle task.
    /// Returns whether a new task was started.
    pub fn ensure_session(&self, id: &str) -> Result<bool> {
        if self.store.load(id)?.is_none() {
            self.store.save(&ConnectionRecord::new(id))?;
        }
        Ok(self.controller.ensure(id)?)
    }

    /// Respawns lifecycle tasks for every persisted connection that holds a
    /// stored session, typically at process start. Returns the ids for
    /// which a task was spawned.
    pub fn restore_sessions(&self) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for record in self.store.list()? {
            if !record.has_session() {
                continue;
            }
            match self.controller.ensure(&record.id) {
                Ok(true) => restored.push(record.id),
                Ok(false) => {}
                Err(e) => {
                    warn!(connection = %record.id, error = %e, "session restore failed")
                }
            }
        }
        info!(count = restored.len(), "sessions restored");
        Ok(restored)
    }

    /// Enumerates every persisted connection record.
    pub fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        Ok(self.store.list()?)
    }

    fn active_adapter(&self) -> Result<Arc<SocketAdapter>> {
        self.registry
            .any_connected()
            .ok_or(GatewayError::NoActiveConnection)
    }

    /// Folds an adapter failure into the caller-facing taxonomy. A session
    /// conflict clears persisted state before the error is returned.
    fn adapter_failure(&self, adapter: &SocketAdapter, err: zap_runtime::Error) -> GatewayError {
        if err.is_session_conflict() {
            self.force_session_clear(adapter.connection_id());
        }
        err.into()
    }

    fn force_session_clear(&self, id: &str) {
        warn!(connection = %id, "session conflict; clearing persisted state");
        self.registry.revoke(id);
        if let Err(e) = self.store.update(id, |record| {
            record.status = ConnectionStatus::Deactive;
            record.session = None;
            record.qrcode = None;
        }) {
            if !e.is_not_found() {
                warn!(connection = %id, error = %e, "failed to clear persisted state");
            }
        }
        self.board.reject(id, TicketFailure::SessionConflict);
    }
}
