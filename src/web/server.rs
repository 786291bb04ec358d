//! Callback HTTP server for feedpulse.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::{FeedPulseError, Result};

use super::handlers::AppState;
use super::router::create_router;

/// HTTP server for hub callbacks and health checks.
pub struct CallbackServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl CallbackServer {
    /// Create a new server.
    pub fn new(config: &ServerConfig, state: Arc<AppState>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| FeedPulseError::Validation(format!("invalid listener address: {}", e)))?;

        Ok(Self { addr, state })
    }

    /// Get the configured address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the server until it fails.
    pub async fn run(self) -> std::io::Result<()> {
        let router = create_router(self.state);
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Callback listener on http://{}", local_addr);

        axum::serve(listener, router).await
    }

    /// Run the server in the background and return the bound address.
    ///
    /// Binding to port 0 picks a free port; useful for tests.
    pub async fn run_with_addr(self) -> std::io::Result<SocketAddr> {
        let router = create_router(self.state);
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Callback listener on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Callback listener error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
