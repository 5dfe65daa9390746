//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsbridge_settings::BridgeSettings;

/// Configuration for the WebSocket server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind (default `"127.0.0.1"`).
    pub address: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Request target accepted for the upgrade.
    pub path: String,
    /// Maximum concurrent open connections.
    pub max_connections: usize,
    /// Max frame and reassembled message size in bytes.
    pub max_message_size: usize,
    /// Ping interval in seconds, `0` disables.
    pub heartbeat_interval_secs: u64,
    /// Seconds of read silence before a connection is dropped, `0` disables.
    pub idle_timeout_secs: u64,
    /// Seconds allowed for the upgrade request.
    pub handshake_timeout_secs: u64,
    /// Per-connection outbound queue depth.
    pub outbound_queue_capacity: usize,
    /// Seconds `stop` waits for sessions before giving up.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 0,
            path: "/".into(),
            max_connections: 50,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            handshake_timeout_secs: 10,
            outbound_queue_capacity: 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Ping interval, `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        non_zero_secs(self.heartbeat_interval_secs)
    }

    /// Idle read timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    /// Upgrade request deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Bound on `stop`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl From<&BridgeSettings> for ServerConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            address: settings.address.clone(),
            port: settings.port,
            path: settings.path.clone(),
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            idle_timeout_secs: settings.idle_timeout_secs,
            handshake_timeout_secs: settings.handshake_timeout_secs,
            ..Self::default()
        }
    }
}
