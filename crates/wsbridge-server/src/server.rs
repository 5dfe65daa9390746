//! `WsServer`: TCP listener, accept loop and stop handle.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::MessageHandler;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionContext, run_session};

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `address` is not an IP address.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Non-zero status for callers that report startup as a number.
    pub fn status(&self) -> u8 {
        match self {
            Self::Bind { .. } => 1,
            Self::InvalidAddress(_) => 2,
        }
    }
}

/// The WebSocket server.
pub struct WsServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl WsServer {
    /// Create a new server. Nothing is bound until [`WsServer::start`].
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Get the connection registry, for handlers that need to reply or
    /// broadcast.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start accepting connections.
    ///
    /// On error nothing has been spawned or registered.
    pub async fn start(self, handler: Arc<dyn MessageHandler>) -> Result<ServerHandle, ServerError> {
        let ip: IpAddr = self
            .config
            .address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.config.address.clone()))?;
        let requested = SocketAddr::new(ip, self.config.port);
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| ServerError::Bind {
                addr: requested,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: requested,
                source,
            })?;
        info!(%local_addr, path = %self.config.path, "listening");

        let shutdown_timeout = self.config.shutdown_timeout();
        let ctx = Arc::new(SessionContext {
            config: self.config,
            registry: self.registry.clone(),
            handler,
            shutdown: self.shutdown.token(),
        });
        self.shutdown
            .spawn(accept_loop(listener, ctx, self.shutdown.clone()));

        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            shutdown: self.shutdown,
            shutdown_timeout,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    shutdown: Arc<ShutdownCoordinator>,
) {
    let token = shutdown.token();
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    shutdown.spawn(run_session(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("listener closed");
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Stop accepting, close every connection with 1001 and wait for the
    /// sessions to finish. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.graceful_shutdown(self.shutdown_timeout).await;
        info!("server stopped");
    }
}
