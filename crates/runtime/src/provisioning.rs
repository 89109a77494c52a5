//! Pending login-code waits with deadlines.
//!
//! Each connection in `AWAITING_QR` holds one ticket on this board. A
//! ticket resolves with the login-code payload (or with an already-open
//! session) or rejects with a typed failure; no caller ever waits past
//! its deadline without a definitive answer. Waiters register before
//! checking state to prevent lost wakeups.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// How a provisioning wait resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// A scannable login-code payload was issued.
    LoginCode(String),
    /// The session opened (stored credentials were still valid), so no
    /// login code will be issued for this attempt chain.
    Open,
}

/// Why a ticket rejected.
#[derive(Debug, Clone)]
pub enum TicketFailure {
    /// Bounded reconnection attempts were exhausted.
    RetriesExhausted(u32),
    /// The connection was removed while the ticket was pending.
    Removed,
    /// The remote side invalidated the session.
    SessionConflict,
    /// An internal fault drove the lifecycle to FAILED.
    Fault(String),
}

impl TicketFailure {
    fn into_error(self) -> Error {
        match self {
            TicketFailure::RetriesExhausted(attempts) => Error::RetriesExhausted { attempts },
            TicketFailure::Removed => Error::Removed,
            TicketFailure::SessionConflict => Error::SessionConflict,
            TicketFailure::Fault(message) => Error::Transport(message),
        }
    }
}

#[derive(Debug, Clone)]
enum SlotState {
    Pending,
    Code(String),
    Open,
    Failed(TicketFailure),
}

struct TicketSlot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl TicketSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            notify: Notify::new(),
        }
    }
}

/// In-memory board of provisioning tickets, keyed by connection id.
#[derive(Default)]
pub struct ProvisioningBoard {
    slots: DashMap<String, Arc<TicketSlot>>,
}

impl ProvisioningBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Arc<TicketSlot> {
        self.slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(TicketSlot::new()))
            .clone()
    }

    /// Resolves the ticket with a login-code payload. The payload must
    /// already be persisted to the connection record, so a concurrent
    /// reader observes the same code the ticket resolves with.
    pub fn publish_code(&self, id: &str, payload: &str) {
        let slot = self.slot(id);
        *slot.state.lock() = SlotState::Code(payload.to_string());
        slot.notify.notify_waiters();
    }

    /// Resolves the ticket with an open session.
    pub fn publish_open(&self, id: &str) {
        let slot = self.slot(id);
        *slot.state.lock() = SlotState::Open;
        slot.notify.notify_waiters();
    }

    /// Rejects the ticket with a terminal failure.
    pub fn reject(&self, id: &str, failure: TicketFailure) {
        let slot = self.slot(id);
        *slot.state.lock() = SlotState::Failed(failure);
        slot.notify.notify_waiters();
    }

    /// Clears any previous outcome for a fresh operator-initiated attempt
    /// chain.
    pub fn reset(&self, id: &str) {
        let slot = self.slot(id);
        *slot.state.lock() = SlotState::Pending;
    }

    /// Drops the slot entirely (connection removed).
    pub fn remove(&self, id: &str) {
        self.slots.remove(id);
    }

    /// Waits for the ticket to resolve or reject, bounded by `timeout`.
    ///
    /// The slot is pinned once up front: a terminal state set on it is
    /// observed even if the slot is dropped from the board (removal) while
    /// the waiter is suspended.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<ProvisioningOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let slot = self.slot(id);

        loop {
            let notified = slot.notify.notified();

            match slot.state.lock().clone() {
                SlotState::Code(payload) => return Ok(ProvisioningOutcome::LoginCode(payload)),
                SlotState::Open => return Ok(ProvisioningOutcome::Open),
                SlotState::Failed(failure) => return Err(failure.into_error()),
                SlotState::Pending => {}
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "no login code issued for connection {id} within the provisioning deadline"
                )));
            }

            tokio::select! {
                biased;
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => {
                    return Err(Error::Timeout(format!(
                        "no login code issued for connection {id} within the provisioning deadline"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_when_code_published() {
        let board = Arc::new(ProvisioningBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.wait("c1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        board.publish_code("c1", "2@code");

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, ProvisioningOutcome::LoginCode("2@code".to_string()));
    }

    #[tokio::test]
    async fn test_wait_observes_code_published_before_wait() {
        let board = ProvisioningBoard::new();
        board.publish_code("c1", "2@code");
        let outcome = board.wait("c1", Duration::from_millis(10)).await.unwrap();
        assert_eq!(outcome, ProvisioningOutcome::LoginCode("2@code".to_string()));
    }

    #[tokio::test]
    async fn test_wait_rejects_on_failure() {
        let board = Arc::new(ProvisioningBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.wait("c1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        board.reject("c1", TicketFailure::RetriesExhausted(3));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let board = ProvisioningBoard::new();
        let err = board
            .wait("c1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_observe_same_code() {
        let board = Arc::new(ProvisioningBoard::new());
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let board = Arc::clone(&board);
            waiters.push(tokio::spawn(async move {
                board.wait("c1", Duration::from_secs(5)).await
            }));
        }

        tokio::task::yield_now().await;
        board.publish_code("c1", "2@same");

        for waiter in waiters {
            let outcome = waiter.await.unwrap().unwrap();
            assert_eq!(
                outcome,
                ProvisioningOutcome::LoginCode("2@same".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_waiter_observes_rejection_despite_slot_removal() {
        // Removal drops the slot right after rejecting it; a suspended
        // waiter must still see the rejection, not pend until its deadline.
        let board = Arc::new(ProvisioningBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.wait("c1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        board.reject("c1", TicketFailure::Removed);
        board.remove("c1");

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Removed));
    }

    #[tokio::test]
    async fn test_reset_clears_previous_failure() {
        let board = ProvisioningBoard::new();
        board.reject("c1", TicketFailure::Removed);
        board.reset("c1");
        board.publish_open("c1");
        let outcome = board.wait("c1", Duration::from_millis(10)).await.unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Open);
    }
}
