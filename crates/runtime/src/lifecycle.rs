//! Per-connection session lifecycle state machine.
//!
//! One spawned task per connection id drives
//! `INIT → AWAITING_QR → CONNECTING → CONNECTED`, falling back to
//! `CLOSING_RETRY` on transient loss and to `FAILED` once bounded retries
//! are exhausted. The task is the single writer of `status`, `session`,
//! `qrcode` and `retry_count` on the connection record, which keeps the
//! state machine consistent without locking the record.
//!
//! Persistence ordering is load-bearing:
//! - the login-code payload is written to the record *before* the
//!   provisioning ticket resolves, so a concurrent reader observes the same
//!   code the ticket resolves with;
//! - credentials are persisted *before* CONNECTED becomes observable, so a
//!   crash between "transport open" and "credentials saved" cannot leave a
//!   caller believing the session survives a restart.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use zap_protocol::{CloseReason, ConnectionStatus, TransportEvent};

use crate::adapter::SocketAdapter;
use crate::error::Result;
use crate::provisioning::{ProvisioningBoard, TicketFailure};
use crate::registry::{ConnectionRegistry, SessionState};
use crate::store::CredentialStore;
use crate::transport::TransportFactory;

/// Timing and retry bounds for the lifecycle state machine.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a provisioning ticket may wait for a login code.
    pub provisioning_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Reconnect attempts allowed within one attempt chain.
    pub max_retries: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout: Duration::from_secs(29),
            retry_delay: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// How one transport attempt ended.
enum AttemptEnd {
    /// Closed before the transport ever reported open.
    ClosedBeforeOpen,
    /// Closed after a successful open (retry budget was reset at open).
    ClosedAfterOpen,
    /// The remote side invalidated the session.
    Conflict,
    /// The session was logged out.
    LoggedOut,
    /// Another claim superseded this task's generation.
    Stale,
}

/// Drives the lifecycle of every connection it is asked to ensure.
pub struct SessionLifecycleController {
    store: Arc<CredentialStore>,
    registry: Arc<ConnectionRegistry>,
    board: Arc<ProvisioningBoard>,
    factory: Arc<dyn TransportFactory>,
    config: LifecycleConfig,
}

impl SessionLifecycleController {
    pub fn new(
        store: Arc<CredentialStore>,
        registry: Arc<ConnectionRegistry>,
        board: Arc<ProvisioningBoard>,
        factory: Arc<dyn TransportFactory>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            board,
            factory,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Starts a lifecycle task for `id` if none is live.
    ///
    /// This is the operator-initiated fresh attempt: the retry budget and
    /// any stale login code are reset before the task starts. Returns
    /// whether a new task was spawned; `Ok(false)` means a non-terminal
    /// task already owns the id.
    pub fn ensure(self: &Arc<Self>, id: &str) -> Result<bool> {
        if self.store.load(id)?.is_none() {
            return Err(crate::error::Error::ConnectionNotFound(id.to_string()));
        }
        let Some(generation) = self.registry.begin(id) else {
            return Ok(false);
        };
        self.board.reset(id);
        self.store.update(id, |record| {
            record.retry_count = 0;
            record.qrcode = None;
        })?;

        let controller = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            controller.run(id, generation).await;
        });
        Ok(true)
    }

    async fn run(self: Arc<Self>, id: String, generation: u64) {
        debug!(connection = %id, generation, "lifecycle task started");
        loop {
            if !self.registry.is_current(&id, generation) {
                debug!(connection = %id, "claim superseded; lifecycle exiting");
                return;
            }

            let end = match self.attempt(&id, generation).await {
                Ok(end) => end,
                Err(e) if e.is_not_found() => {
                    debug!(connection = %id, "record removed mid-attempt; lifecycle exiting");
                    return;
                }
                Err(e) => {
                    // Unhandled internal fault during event handling.
                    self.fail(&id, generation, TicketFailure::Fault(e.to_string()));
                    return;
                }
            };

            match end {
                AttemptEnd::Stale => {
                    debug!(connection = %id, "claim superseded; lifecycle exiting");
                    return;
                }
                AttemptEnd::Conflict => {
                    warn!(connection = %id, "session conflict reported; clearing stored session");
                    self.clear_session(&id, generation, TicketFailure::SessionConflict);
                    return;
                }
                AttemptEnd::LoggedOut => {
                    info!(connection = %id, "session logged out; clearing stored session");
                    self.clear_session(
                        &id,
                        generation,
                        TicketFailure::Fault("session logged out".to_string()),
                    );
                    return;
                }
                AttemptEnd::ClosedBeforeOpen | AttemptEnd::ClosedAfterOpen => {
                    let record = match self.store.load(&id) {
                        Ok(Some(record)) => record,
                        Ok(None) => return,
                        Err(e) => {
                            self.fail(&id, generation, TicketFailure::Fault(e.to_string()));
                            return;
                        }
                    };

                    if record.retry_count >= self.config.max_retries {
                        self.fail(
                            &id,
                            generation,
                            TicketFailure::RetriesExhausted(record.retry_count),
                        );
                        return;
                    }

                    let updated = match self.store.update(&id, |record| {
                        record.retry_count += 1;
                        record.status = ConnectionStatus::Deactive;
                    }) {
                        Ok(updated) => updated,
                        Err(e) if e.is_not_found() => return,
                        Err(e) => {
                            self.fail(&id, generation, TicketFailure::Fault(e.to_string()));
                            return;
                        }
                    };

                    self.registry
                        .set_state(&id, generation, SessionState::ClosingRetry);
                    // The previous attempt's outcome (an open, or a code
                    // that died with the transport) must not satisfy
                    // provisioning waits during the reconnect.
                    self.board.reset(&id);
                    warn!(
                        connection = %id,
                        retry = updated.retry_count,
                        max = self.config.max_retries,
                        "transport closed; reconnect scheduled"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    // The loop head re-checks the generation, so a removal
                    // during the sleep wins over the reconnect.
                }
            }
        }
    }

    /// Runs one transport attempt to completion.
    async fn attempt(&self, id: &str, generation: u64) -> Result<AttemptEnd> {
        let (adapter, mut events, has_credentials) =
            match SocketAdapter::connect(self.factory.as_ref(), &self.store, id).await {
                Ok(parts) => parts,
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    warn!(connection = %id, error = %e, "transport construction failed");
                    return Ok(AttemptEnd::ClosedBeforeOpen);
                }
            };

        let initial = if has_credentials {
            SessionState::Connecting
        } else {
            SessionState::AwaitingQr
        };
        if !self.registry.set_state(id, generation, initial) {
            let _ = adapter.close().await;
            return Ok(AttemptEnd::Stale);
        }
        debug!(connection = %id, state = %initial, "transport constructed");

        let mut opened = false;
        while let Some(event) = events.recv().await {
            if !self.registry.is_current(id, generation) {
                let _ = adapter.close().await;
                return Ok(AttemptEnd::Stale);
            }

            match event {
                TransportEvent::QrIssued { payload } => {
                    // Persist before resolving the ticket: a concurrent
                    // reader of the record must observe the same code.
                    self.store
                        .update(id, |record| record.qrcode = Some(payload.clone()))?;
                    self.registry
                        .set_state(id, generation, SessionState::AwaitingQr);
                    debug!(connection = %id, "login code issued");
                    self.board.publish_code(id, &payload);
                }
                TransportEvent::CredentialsUpdated(auth) => {
                    self.store.write_auth(id, &auth)?;
                    debug!(connection = %id, "credentials persisted");
                }
                TransportEvent::Opened => {
                    // Credentials are already durable (CredentialsUpdated
                    // is ordered before Opened). Record the open session
                    // before CONNECTED becomes observable.
                    self.store.update(id, |record| {
                        record.status = ConnectionStatus::Active;
                        record.qrcode = None;
                        record.retry_count = 0;
                    })?;
                    if !self
                        .registry
                        .set_connected(id, generation, Arc::clone(&adapter))
                    {
                        let _ = adapter.close().await;
                        return Ok(AttemptEnd::Stale);
                    }
                    opened = true;
                    info!(connection = %id, "session open");
                    self.board.publish_open(id);
                }
                TransportEvent::Closed { reason } => {
                    debug!(connection = %id, ?reason, opened, "transport closed");
                    return Ok(match reason {
                        CloseReason::SessionConflict => AttemptEnd::Conflict,
                        CloseReason::LoggedOut => AttemptEnd::LoggedOut,
                        CloseReason::ConnectionLost | CloseReason::TransportFailure(_) => {
                            if opened {
                                AttemptEnd::ClosedAfterOpen
                            } else {
                                AttemptEnd::ClosedBeforeOpen
                            }
                        }
                    });
                }
            }
        }

        debug!(connection = %id, "transport event stream ended");
        Ok(if opened {
            AttemptEnd::ClosedAfterOpen
        } else {
            AttemptEnd::ClosedBeforeOpen
        })
    }

    /// Terminal failure: force the record deactive, tear down the registry
    /// entry, and reject any pending ticket. The stored session blob is
    /// kept, since the credentials may still be valid once connectivity
    /// returns.
    fn fail(&self, id: &str, generation: u64, failure: TicketFailure) {
        error!(connection = %id, ?failure, "lifecycle failed");
        if let Err(e) = self.store.update(id, |record| {
            record.status = ConnectionStatus::Deactive;
            record.qrcode = None;
        }) {
            if !e.is_not_found() {
                warn!(connection = %id, error = %e, "failed to mark record deactive");
            }
        }
        self.registry.set_state(id, generation, SessionState::Failed);
        self.board.reject(id, failure);
    }

    /// Terminal invalidation: the stored session must not be reused, so the
    /// blob is cleared along with the status.
    fn clear_session(&self, id: &str, generation: u64, failure: TicketFailure) {
        if let Err(e) = self.store.update(id, |record| {
            record.status = ConnectionStatus::Deactive;
            record.session = None;
            record.qrcode = None;
        }) {
            if !e.is_not_found() {
                warn!(connection = %id, error = %e, "failed to clear stored session");
            }
        }
        self.registry.set_state(id, generation, SessionState::Failed);
        self.board.reject(id, failure);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use zap_protocol::{
        AddParticipantsOptions, AuthCredentials, AuthState, ConnectionRecord, ConnectionStatus,
        CreateGroupOptions, GroupInfo, KeyMaterial, KeyPair, SignedPreKey,
    };

    use super::*;
    use crate::error::Error;
    use crate::provisioning::ProvisioningOutcome;
    use crate::transport::{KeyProvider, TransportHandle, TransportParts};

    struct Script {
        events: Vec<TransportEvent>,
        hold_open: bool,
    }

    #[derive(Default)]
    struct NullHandle;

    #[async_trait]
    impl TransportHandle for NullHandle {
        async fn send_text(&self, _group_jid: &str, _message: &str) -> Result<()> {
            Ok(())
        }
        async fn create_group(&self, _options: &CreateGroupOptions) -> Result<GroupInfo> {
            Err(Error::Transport("not scripted".to_string()))
        }
        async fn add_participants(&self, _options: &AddParticipantsOptions) -> Result<()> {
            Ok(())
        }
        async fn logout(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Replays one pre-baked event script per connect call.
    struct ScriptedFactory {
        scripts: Mutex<VecDeque<Script>>,
        connects: AtomicUsize,
        // Keeps senders alive so "still open" scripts do not end the stream.
        held: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
                held: Mutex::new(Vec::new()),
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportFactory for ScriptedFactory {
        async fn connect(
            &self,
            _auth: Option<AuthState>,
            _keys: KeyProvider,
        ) -> Result<TransportParts> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().pop_front().unwrap_or(Script {
                events: Vec::new(),
                hold_open: false,
            });

            let (tx, rx) = mpsc::unbounded_channel();
            for event in script.events {
                let _ = tx.send(event);
            }
            if script.hold_open {
                self.held.lock().push(tx);
            }

            Ok(TransportParts {
                handle: Arc::new(NullHandle),
                events: rx,
            })
        }
    }

    fn sample_auth() -> AuthState {
        AuthState {
            creds: Some(AuthCredentials {
                noise_key: KeyPair {
                    public: KeyMaterial(vec![1; 32]),
                    private: KeyMaterial(vec![2; 32]),
                },
                signed_identity_key: KeyPair {
                    public: KeyMaterial(vec![3; 32]),
                    private: KeyMaterial(vec![4; 32]),
                },
                signed_pre_key: SignedPreKey {
                    key_id: 1,
                    key_pair: KeyPair {
                        public: KeyMaterial(vec![5; 32]),
                        private: KeyMaterial(vec![6; 32]),
                    },
                    signature: KeyMaterial(vec![7; 64]),
                },
                registration_id: 99,
                adv_secret_key: KeyMaterial(vec![8; 32]),
                me: None,
                registered: true,
            }),
            keys: Default::default(),
        }
    }

    fn test_config() -> LifecycleConfig {
        LifecycleConfig {
            provisioning_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(10),
            max_retries: 3,
        }
    }

    struct Harness {
        controller: Arc<SessionLifecycleController>,
        store: Arc<CredentialStore>,
        registry: Arc<ConnectionRegistry>,
        board: Arc<ProvisioningBoard>,
        factory: Arc<ScriptedFactory>,
        _dir: TempDir,
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path()));
        let registry = Arc::new(ConnectionRegistry::new());
        let board = Arc::new(ProvisioningBoard::new());
        let factory = Arc::new(ScriptedFactory::new(scripts));
        let controller = Arc::new(SessionLifecycleController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&board),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            test_config(),
        ));
        Harness {
            controller,
            store,
            registry,
            board,
            factory,
            _dir: dir,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within deadline");
    }

    #[tokio::test]
    async fn test_pairing_flow_issues_code_then_connects() {
        let h = harness(vec![Script {
            events: vec![
                TransportEvent::QrIssued {
                    payload: "2@code".to_string(),
                },
                TransportEvent::CredentialsUpdated(Box::new(sample_auth())),
                TransportEvent::Opened,
            ],
            hold_open: true,
        }]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();

        assert!(h.controller.ensure("c1").unwrap());
        // The open may race ahead of the wait, so either outcome is valid.
        let outcome = h.board.wait("c1", Duration::from_secs(2)).await.unwrap();
        assert!(matches!(
            outcome,
            ProvisioningOutcome::LoginCode(_) | ProvisioningOutcome::Open
        ));

        let registry = Arc::clone(&h.registry);
        wait_until(move || registry.connected("c1").is_some()).await;

        let record = h.store.load("c1").unwrap().unwrap();
        assert_eq!(record.status, ConnectionStatus::Active);
        assert_eq!(record.retry_count, 0);
        assert!(record.qrcode.is_none());
        assert!(record.session.is_some());
        assert_eq!(h.registry.state("c1"), Some(SessionState::Connected));
    }

    #[tokio::test]
    async fn test_qr_persisted_before_ticket_resolves() {
        let h = harness(vec![Script {
            events: vec![TransportEvent::QrIssued {
                payload: "2@persisted".to_string(),
            }],
            hold_open: true,
        }]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();

        h.controller.ensure("c1").unwrap();
        let outcome = h.board.wait("c1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(
            outcome,
            ProvisioningOutcome::LoginCode("2@persisted".to_string())
        );

        // No open event in the script, so the persisted code must still be
        // exactly what the ticket resolved with.
        let record = h.store.load("c1").unwrap().unwrap();
        assert_eq!(record.qrcode.as_deref(), Some("2@persisted"));
        assert_eq!(h.registry.state("c1"), Some(SessionState::AwaitingQr));
    }

    #[tokio::test]
    async fn test_stored_credentials_skip_pairing() {
        let h = harness(vec![Script {
            events: vec![TransportEvent::Opened],
            hold_open: true,
        }]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();
        h.store.write_auth("c1", &sample_auth()).unwrap();

        h.controller.ensure("c1").unwrap();
        let outcome = h.board.wait("c1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Open);
        assert!(h.registry.connected("c1").is_some());
    }

    #[tokio::test]
    async fn test_four_closures_exhaust_retries() {
        let closed = || Script {
            events: vec![TransportEvent::Closed {
                reason: CloseReason::ConnectionLost,
            }],
            hold_open: false,
        };
        let h = harness(vec![closed(), closed(), closed(), closed()]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();

        h.controller.ensure("c1").unwrap();
        let err = h
            .board
            .wait("c1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));

        let record = h.store.load("c1").unwrap().unwrap();
        assert_eq!(record.status, ConnectionStatus::Deactive);
        assert_eq!(record.retry_count, 3);
        assert_eq!(h.registry.state("c1"), Some(SessionState::Failed));
        assert_eq!(h.factory.connects(), 4);
    }

    #[tokio::test]
    async fn test_session_conflict_clears_stored_session() {
        let h = harness(vec![Script {
            events: vec![TransportEvent::Closed {
                reason: CloseReason::SessionConflict,
            }],
            hold_open: false,
        }]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();
        h.store.write_auth("c1", &sample_auth()).unwrap();

        h.controller.ensure("c1").unwrap();
        let err = h
            .board
            .wait("c1", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_session_conflict());

        let record = h.store.load("c1").unwrap().unwrap();
        assert_eq!(record.status, ConnectionStatus::Deactive);
        assert!(record.session.is_none());
        // No reconnect was attempted with the invalidated credentials.
        assert_eq!(h.factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_post_open_closure_discards_open_outcome() {
        // A session that opens and then loses its transport must not keep
        // answering provisioning waits with the dead open; the reconnect
        // issues a fresh code and that is what waiters see.
        let h = harness(vec![
            Script {
                events: vec![
                    TransportEvent::Opened,
                    TransportEvent::Closed {
                        reason: CloseReason::ConnectionLost,
                    },
                ],
                hold_open: false,
            },
            Script {
                events: vec![TransportEvent::QrIssued {
                    payload: "2@rescan".to_string(),
                }],
                hold_open: true,
            },
        ]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();

        h.controller.ensure("c1").unwrap();
        let factory = Arc::clone(&h.factory);
        wait_until(move || factory.connects() == 2).await;

        assert!(h.registry.connected("c1").is_none());
        let outcome = h.board.wait("c1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(
            outcome,
            ProvisioningOutcome::LoginCode("2@rescan".to_string())
        );
        assert_eq!(h.registry.state("c1"), Some(SessionState::AwaitingQr));
    }

    #[tokio::test]
    async fn test_revoke_during_retry_stops_reconnects() {
        let h = harness(vec![
            Script {
                events: vec![TransportEvent::Closed {
                    reason: CloseReason::ConnectionLost,
                }],
                hold_open: false,
            },
            Script {
                events: vec![TransportEvent::Opened],
                hold_open: true,
            },
        ]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();

        h.controller.ensure("c1").unwrap();
        let factory = Arc::clone(&h.factory);
        wait_until(move || factory.connects() == 1).await;

        // Removal arrives while the reconnect delay is pending.
        h.registry.revoke("c1");
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(h.factory.connects(), 1, "stale task must not reconnect");
        assert!(h.registry.state("c1").is_none());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_while_live() {
        let h = harness(vec![Script {
            events: vec![TransportEvent::Opened],
            hold_open: true,
        }]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();
        h.store.write_auth("c1", &sample_auth()).unwrap();

        assert!(h.controller.ensure("c1").unwrap());
        let registry = Arc::clone(&h.registry);
        wait_until(move || registry.connected("c1").is_some()).await;
        assert!(!h.controller.ensure("c1").unwrap());
    }

    #[tokio::test]
    async fn test_ensure_unknown_record_fails() {
        let h = harness(vec![]);
        let err = h.controller.ensure("ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_retry_count_resets_on_operator_restart() {
        let closed = || Script {
            events: vec![TransportEvent::Closed {
                reason: CloseReason::ConnectionLost,
            }],
            hold_open: false,
        };
        let h = harness(vec![
            closed(),
            closed(),
            closed(),
            closed(),
            Script {
                events: vec![TransportEvent::Opened],
                hold_open: true,
            },
        ]);
        h.store.save(&ConnectionRecord::new("c1")).unwrap();
        h.store.write_auth("c1", &sample_auth()).unwrap();

        h.controller.ensure("c1").unwrap();
        let err = h
            .board
            .wait("c1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));
        assert_eq!(h.store.load("c1").unwrap().unwrap().retry_count, 3);

        // A fresh operator-initiated attempt starts over with a clean
        // retry budget.
        assert!(h.controller.ensure("c1").unwrap());
        let registry = Arc::clone(&h.registry);
        wait_until(move || registry.connected("c1").is_some()).await;
        let record = h.store.load("c1").unwrap().unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.status, ConnectionStatus::Active);
    }
}
