//! # wsbridge-agent
//!
//! Standalone bridge binary: loads `config.json`, starts the WebSocket
//! server with the JSON request dispatcher and runs until Ctrl-C.

#![deny(unsafe_code)]

mod dry_run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use wsbridge_rpc::RpcDispatcher;
use wsbridge_server::{ServerConfig, WsServer};
use wsbridge_settings::{BridgeSettings, SettingsError};

use crate::dry_run::DryRunHost;

/// WebSocket bridge server.
#[derive(Parser, Debug)]
#[command(name = "wsbridge-agent", about = "WebSocket bridge server")]
struct Cli {
    /// Configuration file, created with defaults when missing.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Address to bind (overrides the config file).
    #[arg(long)]
    address: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Upgrade path clients must request.
    #[arg(long)]
    path: Option<String>,

    /// Log filter, e.g. `info` or `wsbridge_server=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut BridgeSettings) -> Result<()> {
        if let Some(address) = &self.address {
            settings.address.clone_from(address);
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(path) = &self.path {
            if !path.starts_with('/') {
                bail!("--path must start with '/': {path}");
            }
            settings.path.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(())
    }
}

/// Load settings, falling back to defaults when the file is not valid JSON.
///
/// The parse error is returned alongside so it can be logged once the
/// subscriber is up.
fn load_settings(path: &Path) -> Result<(BridgeSettings, Option<SettingsError>)> {
    let _ = wsbridge_settings::ensure_config_file(path)
        .with_context(|| format!("Failed to create config file: {}", path.display()))?;
    match wsbridge_settings::load_settings_from_path(path) {
        Ok(settings) => Ok((settings, None)),
        Err(err @ SettingsError::Json(_)) => Ok((BridgeSettings::default(), Some(err))),
        Err(err) => Err(err).with_context(|| format!("Invalid config file: {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let (mut settings, parse_error) = load_settings(&args.config)?;
    args.apply_overrides(&mut settings)?;

    if settings.logging.json {
        wsbridge_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        wsbridge_core::logging::init_subscriber(&settings.logging.level);
    }
    if let Some(err) = parse_error {
        tracing::warn!(path = %args.config.display(), error = %err, "config file unreadable, using defaults");
    }

    let server = WsServer::new(ServerConfig::from(&settings));
    let dispatcher = RpcDispatcher::new(Arc::new(DryRunHost), server.registry().clone());

    let handle = match server.start(Arc::new(dispatcher)).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "WebSocket server startup failed");
            return Ok(ExitCode::from(err.status()));
        }
    };
    tracing::info!(
        "wsbridge listening on ws://{}{}",
        handle.local_addr(),
        settings.path
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.stop().await;
    tracing::info!("WebSocket server stopped");
    Ok(ExitCode::SUCCESS)
}
