//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every type implements [`Default`] with
//! the production values and is `#[serde(default)]`, so partial files load.

use serde::{Deserialize, Serialize};

/// Root settings for the bridge.
///
/// ```json
/// {
///   "address": "127.0.0.1",
///   "port": 49632,
///   "path": "/"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Listen address.
    pub address: String,
    /// Listen port.
    pub port: u16,
    /// Request target that peers must use for the upgrade.
    pub path: String,
    /// Maximum number of simultaneously open connections.
    pub max_connections: usize,
    /// Largest assembled message accepted from a peer, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings. `0` disables pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without inbound traffic before a peer is dropped. `0` disables.
    pub idle_timeout_secs: u64,
    /// Seconds a new connection has to finish its upgrade request.
    pub handshake_timeout_secs: u64,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 49632,
            path: "/".to_string(),
            max_connections: 50,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            handshake_timeout_secs: 10,
            logging: LoggingSettings::default(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
