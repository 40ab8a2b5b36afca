use std::sync::Arc;

use streams_store::LogStore;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;
use crate::state::AppState;

/// Websocket replay server over a shared [`LogStore`].
pub struct ReplayServer {
    config: ServerConfig,
    state: AppState,
}

impl ReplayServer {
    pub fn new(config: ServerConfig, store: Arc<LogStore>) -> Self {
        let state = AppState::new(store, &config);
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Token that stops the accept loop and every live session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Number of replay sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.state.sessions.len()
    }

    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        Ok(listener)
    }

    /// Accept and serve connections until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        info!(addr = %listener.local_addr()?, "replay server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.state.shutdown.clone().cancelled_owned())
            .await?;
        info!("replay server stopped accepting");
        Ok(())
    }

    /// Stop accepting, close every session, and wait for them to finish.
    pub async fn shutdown(&self) -> ServerResult<()> {
        self.state.shutdown.cancel();
        self.state.sessions.close();

        let limit = self.config.shutdown_timeout();
        match timeout(limit, self.state.sessions.wait()).await {
            Ok(()) => {
                info!("replay sessions drained");
                Ok(())
            }
            Err(_) => {
                warn!(remaining = self.active_sessions(), ?limit, "replay sessions did not drain in time");
                Err(ServerError::ShutdownTimeout(limit))
            }
        }
    }
}
