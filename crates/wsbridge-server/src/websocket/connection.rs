//! WebSocket client connection state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wsbridge_core::ConnectionId;

/// Lifecycle of a connection. Only `Open` connections are registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, upgrade request not yet validated.
    AwaitingHandshake,
    /// Upgraded and registered.
    Open,
    /// Unregistered, close frame queued or transport failed.
    Closing,
    /// Transport released.
    Closed,
}

/// Item on a connection's outbound queue, drained by its writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame, written as-is.
    Frame(Bytes),
    /// Final item: write the close frame if any, then shut down the write half.
    Close(Option<Bytes>),
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Remote address.
    pub peer: SocketAddr,
    /// When this connection was accepted.
    pub connected_at: Instant,
    state: Mutex<ConnectionState>,
    /// Sender side of the queue drained by the writer task.
    tx: mpsc::Sender<Outbound>,
    /// When the last inbound bytes were read.
    last_seen: Mutex<Instant>,
    /// Ends this connection's session.
    cancel: CancellationToken,
    /// Count of frames dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection awaiting its handshake.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            connected_at: now,
            state: Mutex::new(ConnectionState::AwaitingHandshake),
            tx,
            last_seen: Mutex::new(now),
            cancel,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Enqueue an encoded frame without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        if self.tx.try_send(Outbound::Frame(frame)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue the final item, waiting for room.
    pub(crate) async fn enqueue_close(&self, frame: Option<Bytes>) -> bool {
        self.tx.send(Outbound::Close(frame)).await.is_ok()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Ask the session to end. The session unregisters and releases the
    /// transport.
    pub fn release(&self) {
        self.cancel.cancel();
    }

    /// Whether `release` was called or the server is stopping.
    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(
    capacity: usize,
) -> (std::sync::Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = ClientConnection::new(
        ConnectionId::new(),
        SocketAddr::from(([127, 0, 0, 1], 40000)),
        tx,
        CancellationToken::new(),
    );
    (std::sync::Arc::new(conn), rx)
}
