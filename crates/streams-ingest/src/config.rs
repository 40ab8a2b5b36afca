use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryState;

/// Upstream feed settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Combined-stream websocket endpoint; `?streams=` is appended to it.
    pub endpoint: String,
    /// Bound on the websocket handshake.
    pub connect_timeout_secs: u64,
    /// Bound on the wait for each inbound message.
    pub read_timeout_secs: u64,
    /// Pause between reconnect attempts.
    pub retry_delay_secs: u64,
    /// Consecutive rapid failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://stream.binance.com:9443/stream".into(),
            connect_timeout_secs: 60,
            read_timeout_secs: 180,
            retry_delay_secs: 60,
            max_attempts: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Fresh reconnect policy built from these settings.
    pub fn retry_state(&self) -> RetryState {
        RetryState::new(self.max_attempts, self.retry_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = UpstreamConfig::default();
        assert_eq!(c.connect_timeout(), Duration::from_secs(60));
        assert_eq!(c.read_timeout(), Duration::from_secs(180));
        assert_eq!(c.retry_delay(), Duration::from_secs(60));
        assert_eq!(c.max_attempts, 10);
        assert!(c.endpoint.starts_with("wss://"));
        assert_eq!(c.retry_state().attempts(), 0);
        assert_eq!(c.retry_state().delay(), Duration::from_secs(60));
    }
}
