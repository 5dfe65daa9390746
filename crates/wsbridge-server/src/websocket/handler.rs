//! Dispatch boundary between the transport and the application.

use async_trait::async_trait;
use wsbridge_core::ConnectionId;

/// Receives every completed text message.
///
/// `handle` is awaited before the session reads further messages from the
/// same connection. Its outcome never affects the transport; replies go
/// through [`ConnectionRegistry::send`](super::registry::ConnectionRegistry::send).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one text message from `connection_id`.
    async fn handle(&self, payload: String, connection_id: &ConnectionId);
}
