//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If the config file exists, deep-merge its values over the defaults
//!    (a top-level field whose value has the wrong type is skipped with a
//!    warning; the rest of the file still applies)
//! 3. Apply `WSBRIDGE_*` environment variable overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{Result, SettingsError};
use crate::types::BridgeSettings;

/// Smallest message limit that still admits every control frame.
const MIN_MESSAGE_SIZE: usize = 125;

/// Write the default settings to `path` if no file exists there yet.
///
/// Returns `true` when a file was created. Parent directories are created as
/// needed. An existing file is never touched.
pub fn ensure_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&BridgeSettings::default())?;
    std::fs::write(path, content)?;
    info!(?path, "wrote default config file");
    Ok(true)
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults (plus env overrides). Invalid JSON is an
/// error; callers decide whether to fall back.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        merge_valid_fields(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut settings: BridgeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Merge `user` over `defaults` one top-level field at a time, dropping
/// fields that would not deserialize.
fn merge_valid_fields(defaults: Value, user: Value) -> Value {
    let Value::Object(fields) = user else {
        warn!("config file is not a JSON object, ignoring it");
        return defaults;
    };
    let mut merged = defaults;
    for (key, value) in fields {
        let mut single = serde_json::Map::new();
        let _ = single.insert(key.clone(), value);
        let candidate = deep_merge(merged.clone(), Value::Object(single));
        if serde_json::from_value::<BridgeSettings>(candidate.clone()).is_ok() {
            merged = candidate;
        } else {
            warn!(field = %key, "ignoring config field with invalid value");
        }
    }
    merged
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut BridgeSettings) {
    if let Some(v) = read_env_string("WSBRIDGE_ADDRESS") {
        settings.address = v;
    }
    if let Some(v) = read_env_u64("WSBRIDGE_PORT", 1, u64::from(u16::MAX)) {
        settings.port = v as u16;
    }
    if let Some(v) = read_env_string("WSBRIDGE_PATH") {
        settings.path = v;
    }
    if let Some(v) = read_env_u64("WSBRIDGE_MAX_CONNECTIONS", 1, 100_000) {
        settings.max_connections = v as usize;
    }
    if let Some(v) = read_env_u64("WSBRIDGE_MAX_MESSAGE_SIZE", MIN_MESSAGE_SIZE as u64, 1 << 30) {
        settings.max_message_size = v as usize;
    }
    if let Some(v) = read_env_u64("WSBRIDGE_IDLE_TIMEOUT_SECS", 0, 86_400) {
        settings.idle_timeout_secs = v;
    }
    if let Some(v) = read_env_string("WSBRIDGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn validate(settings: &BridgeSettings) -> Result<()> {
    if !settings.path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "path must start with '/', got '{}'",
            settings.path
        )));
    }
    if settings.max_message_size < MIN_MESSAGE_SIZE {
        return Err(SettingsError::InvalidValue(format!(
            "maxMessageSize must be at least {MIN_MESSAGE_SIZE}, got {}",
            settings.max_message_size
        )));
    }
    if settings.max_connections == 0 {
        return Err(SettingsError::InvalidValue(
            "maxConnections must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"logging": {"level": "info", "json": false}});
        let source = serde_json::json!({"logging": {"json": true}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["logging"]["level"], "info");
        assert_eq!(merged["logging"]["json"], true);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(settings.path, BridgeSettings::default().path);
    }

    #[test]
    fn load_plugin_style_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"address": "0.0.0.0", "port": 50000, "path": "/bot"}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.address, "0.0.0.0");
        assert_eq!(settings.port, 50000);
        assert_eq!(settings.path, "/bot");
        assert_eq!(settings.max_connections, 50);
    }

    #[test]
    fn load_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_field_is_skipped_others_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"address": "0.0.0.0", "port": "eighty", "path": "/bot"}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.port, BridgeSettings::default().port);
        assert_eq!(settings.address, "0.0.0.0");
        assert_eq!(settings.path, "/bot");
    }

    #[test]
    fn non_object_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings, BridgeSettings::default());
    }

    #[test]
    fn tiny_message_limit_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxMessageSize": 0}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );

        std::fs::write(&path, r#"{"maxMessageSize": 125}"#).unwrap();
        assert_eq!(load_settings_from_path(&path).unwrap().max_message_size, 125);
    }

    #[test]
    fn load_relative_path_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"path": "ws"}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn ensure_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert!(ensure_config_file(&path).unwrap());
        let written: BridgeSettings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, BridgeSettings::default());

        std::fs::write(&path, r#"{"port": 1234}"#).unwrap();
        assert!(!ensure_config_file(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"port": 1234}"#);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u64_range(" 80 ", 1, 65535), Some(80));
        assert_eq!(parse_u64_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 1, 65535), None);
    }
}
