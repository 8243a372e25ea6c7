//! Connection manager
//!
//! Owns every live connection of this worker, keyed by session id. Channel
//! membership lives in the [`ChannelRegistry`](crate::registry::ChannelRegistry);
//! this map only resolves session ids to connections.

use super::{Connection, Outbound};
use dashmap::DashMap;
use relay_core::{Identity, MessageId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// WebSocket close code sent to clients when the worker stops
pub const GOING_AWAY: u16 = 1001;

/// Manages all active WebSocket connections
///
/// Uses `DashMap` for concurrent access to connection state.
pub struct ConnectionManager {
    /// Active connections by session ID
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionManager {
    /// Create a new connection manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection
    pub fn add_connection(
        &self,
        session_id: String,
        identity: Identity,
        sender: mpsc::Sender<Outbound>,
        offset: MessageId,
    ) -> Arc<Connection> {
        let connection = Connection::new(session_id.clone(), identity, sender, offset);
        self.connections.insert(session_id.clone(), connection.clone());

        tracing::debug!(session_id = %session_id, "Connection added");

        connection
    }

    /// Remove a connection
    pub fn remove_connection(&self, session_id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(session_id).map(|(_, c)| c);
        if removed.is_some() {
            tracing::debug!(session_id = %session_id, "Connection removed");
        }
        removed
    }

    /// Get a connection by session ID
    pub fn get_connection(&self, session_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(session_id).map(|r| r.clone())
    }

    /// Resolve session ids, skipping those already gone
    pub fn get_connections<S: AsRef<str>>(&self, session_ids: &[S]) -> Vec<Arc<Connection>> {
        session_ids
            .iter()
            .filter_map(|sid| self.get_connection(sid.as_ref()))
            .collect()
    }

    /// Get the total number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get all session IDs
    pub fn all_sessions(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Check if a session exists
    pub fn has_session(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }

    /// Ask every connection to close; returns how many were asked
    ///
    /// Never waits on a connection's queue, so one stuck client cannot hold
    /// up the rest.
    pub fn close_all(&self, reason: &str) -> usize {
        let connections: Vec<_> = self.connections.iter().map(|r| r.clone()).collect();
        let mut closed = 0;

        for conn in connections {
            let frame = Outbound::Close {
                code: GOING_AWAY,
                reason: reason.to_string(),
            };
            if conn.request_close(frame) {
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!(count = closed, "Closing connections");
        }
        closed
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .finish()
    }
}
