//! Registry of open connections: unicast send and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use wsbridge_core::ConnectionId;
use wsbridge_protocol::{Opcode, encode_frame};

use super::connection::{ClientConnection, ConnectionState};

/// Unicast send failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// No open connection with this id.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
    /// The connection's queue was full or closed; it has been released.
    #[error("connection {0} disconnected")]
    Disconnected(ConnectionId),
}

/// Outcome of a broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections removed because their queue refused the frame.
    pub pruned: usize,
}

/// Open connections indexed by id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection and mark it open.
    pub async fn register(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        connection.set_state(ConnectionState::Open);
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Add a connection unless `limit` connections are already open.
    pub async fn try_register(&self, connection: Arc<ClientConnection>, limit: usize) -> bool {
        let mut conns = self.connections.write().await;
        if conns.len() >= limit {
            return false;
        }
        connection.set_state(ConnectionState::Open);
        let _ = conns.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection and mark it closing.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(connection_id);
        if let Some(conn) = &removed {
            conn.set_state(ConnectionState::Closing);
        }
        removed
    }

    /// Look up an open connection.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Ids of all open connections.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send one frame to one connection.
    ///
    /// A connection whose queue refuses the frame is unregistered and released.
    pub async fn send(
        &self,
        connection_id: &ConnectionId,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let conn = self
            .get(connection_id)
            .await
            .ok_or_else(|| SendError::NotFound(connection_id.clone()))?;
        if conn.enqueue(encode_frame(opcode, payload)) {
            return Ok(());
        }
        warn!(conn_id = %conn.id, "failed to enqueue frame, dropping connection");
        self.prune(&conn).await;
        Err(SendError::Disconnected(connection_id.clone()))
    }

    /// Send a text frame to one connection.
    pub async fn send_text(&self, connection_id: &ConnectionId, text: &str) -> Result<(), SendError> {
        self.send(connection_id, Opcode::Text, text.as_bytes()).await
    }

    /// Send one frame to every open connection.
    ///
    /// The frame is encoded once. Connections that refuse it are pruned after
    /// the read lock is released; the others still receive it.
    pub async fn broadcast(&self, opcode: Opcode, payload: &[u8]) -> BroadcastReport {
        let frame = encode_frame(opcode, payload);
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        {
            let conns = self.connections.read().await;
            debug!(recipients = conns.len(), len = payload.len(), "broadcast frame");
            for conn in conns.values() {
                if conn.enqueue(frame.clone()) {
                    report.delivered += 1;
                } else {
                    failed.push(conn.clone());
                }
            }
        }
        for conn in &failed {
            warn!(conn_id = %conn.id, "failed to deliver broadcast, dropping connection");
            self.prune(conn).await;
        }
        report.pruned = failed.len();
        report
    }

    /// Send a text frame to every open connection.
    pub async fn broadcast_text(&self, text: &str) -> BroadcastReport {
        self.broadcast(Opcode::Text, text.as_bytes()).await
    }

    async fn prune(&self, conn: &Arc<ClientConnection>) {
        if self.unregister(&conn.id).await.is_some() {
            counter!("ws_broadcast_pruned_total").increment(1);
        }
        conn.release();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
