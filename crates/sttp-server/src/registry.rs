//! Live-connection bookkeeping: how many clients are connected and who they
//! are, for `--max-connections` enforcement and diagnostics.
//!
//! Unlike the teacher's room-subscription registry, STTP has no room
//! concept — every subscribed session independently filters the same
//! broadcast measurement stream (see `PublisherSession::publish_measurements`)
//! — so this registry only tracks session identity, not routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

/// Diagnostic info about one connected session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote peer address.
    pub peer: SocketAddr,
}

/// Tracks currently connected sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<u64, SessionInfo>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection. Returns `false` (and does not
    /// register) if `max_connections` is already reached.
    pub fn register(&self, session_id: u64, peer: SocketAddr, max_connections: usize) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.len() >= max_connections {
            return false;
        }
        sessions.insert(session_id, SessionInfo { peer });
        true
    }

    /// Removes a session on disconnect.
    pub fn unregister(&self, session_id: u64) {
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).remove(&session_id);
    }

    /// Number of currently connected sessions.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
