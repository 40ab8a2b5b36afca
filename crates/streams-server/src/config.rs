use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Replay connections are closed with a policy code after this long.
    pub max_connection_lifetime_secs: u64,
    /// Time a session may spend delivering its close frame.
    pub close_timeout_secs: u64,
    /// Upper bound on draining replay sessions at shutdown.
    pub shutdown_timeout_secs: u64,
    /// Records buffered between the disk reader and the socket writer.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9443)),
            max_connection_lifetime_secs: 8 * 60 * 60,
            close_timeout_secs: 5,
            shutdown_timeout_secs: 60,
            channel_capacity: 64,
        }
    }
}

impl ServerConfig {
    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
