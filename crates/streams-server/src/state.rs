use std::sync::Arc;
use std::time::Duration;

use streams_store::LogStore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LogStore>,
    /// Live replay sessions.
    pub sessions: TaskTracker,
    /// Fires when the server starts shutting down.
    pub shutdown: CancellationToken,
    pub max_lifetime: Duration,
    /// Bound on delivering the final close frame.
    pub close_timeout: Duration,
    pub channel_capacity: usize,
}

impl AppState {
    pub fn new(store: Arc<LogStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            sessions: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            max_lifetime: config.max_connection_lifetime(),
            close_timeout: config.close_timeout(),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}
