//! # wsbridge-settings
//!
//! Configuration for the bridge, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **Config file**: `config.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WSBRIDGE_*` overrides (highest priority)
//!
//! The file format is a flat camelCase object, so a file that only carries
//! `address`, `port` and `path` is a complete configuration.
//!
//! There is no global instance: callers load a [`BridgeSettings`] value and
//! pass it to whatever needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, ensure_config_file, load_settings_from_path};
pub use types::{BridgeSettings, LoggingSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = BridgeSettings::default();
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
