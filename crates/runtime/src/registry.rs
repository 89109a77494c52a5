//! The authoritative map from connection id to lifecycle state.
//!
//! Written by the session lifecycle controller (and by removal/conflict
//! handling in the gateway); read by everything else. Lookups are O(1) and
//! never block on the connect/retry flow.
//!
//! Every id carries a generation counter that outlives its entry. Removal
//! bumps the generation; a lifecycle task re-checks its captured generation
//! before acting, so an internally scheduled reconnect can never resurrect
//! a removed connection.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::adapter::SocketAdapter;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Adapter construction in progress.
    Init,
    /// Pairing: waiting for a login code to be scanned.
    AwaitingQr,
    /// Transport constructed with stored credentials, not yet open.
    Connecting,
    /// Transport open and usable.
    Connected,
    /// Transient loss; a reconnect attempt is scheduled.
    ClosingRetry,
    /// Retries exhausted or internal fault; terminal until respawned.
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::AwaitingQr => "awaiting_qr",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ClosingRetry => "closing_retry",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for one connection id.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub state: SessionState,
    /// Present only while `state == Connected`.
    pub adapter: Option<Arc<SocketAdapter>>,
    generation: u64,
}

impl ConnectionEntry {
    fn new(generation: u64) -> Self {
        Self {
            state: SessionState::Init,
            adapter: None,
            generation,
        }
    }
}

/// In-memory map `connection id → {state, adapter}` with per-id
/// generations.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, ConnectionEntry>,
    generations: DashMap<String, u64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state, if a controller was ever started.
    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.entries.get(id).map(|e| e.state)
    }

    /// The live adapter for `id`, only while the session is CONNECTED.
    pub fn connected(&self, id: &str) -> Option<Arc<SocketAdapter>> {
        self.entries.get(id).and_then(|e| {
            if e.state == SessionState::Connected {
                e.adapter.clone()
            } else {
                None
            }
        })
    }

    /// Any CONNECTED adapter (the service drives one active session at a
    /// time for outbound operations).
    pub fn any_connected(&self) -> Option<Arc<SocketAdapter>> {
        self.entries.iter().find_map(|e| {
            if e.state == SessionState::Connected {
                e.adapter.clone()
            } else {
                None
            }
        })
    }

    /// True while a non-terminal lifecycle task owns this id.
    pub fn is_live(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.state != SessionState::Failed)
    }

    /// Claims `id` for a new lifecycle task.
    ///
    /// Returns the task's generation, or `None` if a non-terminal task
    /// already owns the id. This is the only way a task may be started,
    /// which keeps the one-adapter-per-id invariant.
    pub fn begin(&self, id: &str) -> Option<u64> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state != SessionState::Failed {
                    return None;
                }
                let generation = self.bump(id);
                occupied.insert(ConnectionEntry::new(generation));
                Some(generation)
            }
            Entry::Vacant(vacant) => {
                let generation = self.bump(id);
                vacant.insert(ConnectionEntry::new(generation));
                Some(generation)
            }
        }
    }

    fn bump(&self, id: &str) -> u64 {
        let mut generation = self.generations.entry(id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// True if `generation` is still the current claim on `id`.
    pub fn is_current(&self, id: &str, generation: u64) -> bool {
        self.generations.get(id).is_some_and(|g| *g == generation)
    }

    /// Invalidates any current claim and removes the entry, returning it.
    ///
    /// Used by connection removal and forced session clears; the owning
    /// lifecycle task observes the stale generation and exits.
    pub fn revoke(&self, id: &str) -> Option<ConnectionEntry> {
        self.bump(id);
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Sets the state for `id` if `generation` is still current. Any
    /// registered adapter is dropped unless the new state is CONNECTED.
    pub fn set_state(&self, id: &str, generation: u64, state: SessionState) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.generation != generation || !self.is_current(id, generation) {
            return false;
        }
        entry.state = state;
        if state != SessionState::Connected {
            entry.adapter = None;
        }
        true
    }

    /// Registers the live adapter and promotes the entry to CONNECTED.
    pub fn set_connected(&self, id: &str, generation: u64, adapter: Arc<SocketAdapter>) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.generation != generation || !self.is_current(id, generation) {
            return false;
        }
        entry.state = SessionState::Connected;
        entry.adapter = Some(adapter);
        true
    }
}
