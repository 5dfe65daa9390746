//! # wsbridge-server
//!
//! Tokio WebSocket server built on `wsbridge-protocol`.
//!
//! - Listener: binds `address:port`, accepts, spawns one session per socket
//! - Sessions: upgrade, receive loop, heartbeat, close handshake
//! - Registry: open connections, unicast send and broadcast fan-out
//! - Graceful stop via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{ServerError, ServerHandle, WsServer};
pub use websocket::connection::{ClientConnection, ConnectionState};
pub use websocket::handler::MessageHandler;
pub use websocket::registry::{BroadcastReport, ConnectionRegistry, SendError};
pub use wsbridge_protocol::Opcode;
