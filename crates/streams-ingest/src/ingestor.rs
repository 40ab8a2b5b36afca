use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use streams_store::LogStore;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::UpstreamConfig;
use crate::envelope::{subscription_url, Envelope};
use crate::error::{IngestError, IngestResult};
use crate::keys::append_record;

/// A feed that can be run one session at a time.
///
/// A session returns `Ok(())` when it stopped because `cancel` fired or the
/// upstream went away cleanly, and an error for any connection-level
/// failure. Implementations never retry internally.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn run(&self, cancel: &CancellationToken) -> IngestResult<()>;
}

/// Per-session message counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages persisted to their stream.
    pub accepted: u64,
    /// Messages dropped: undecodable, unknown stream, or failed write.
    pub skipped: u64,
}

/// Websocket client that records the combined market feed.
///
/// One connection carries every stream of the store.
pub struct UpstreamIngestor {
    store: Arc<LogStore>,
    config: UpstreamConfig,
}

impl UpstreamIngestor {
    pub fn new(store: Arc<LogStore>, config: UpstreamConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Subscription address for every stream in the store.
    pub fn subscription_url(&self) -> IngestResult<String> {
        subscription_url(&self.config.endpoint, &self.store.list())
    }

    /// Decode one text frame and append it to its stream.
    ///
    /// The store write runs on the blocking pool; frames are still appended
    /// one at a time, in arrival order.
    async fn accept(&self, text: &str, stats: &mut IngestStats) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "skipping undecodable upstream message");
                stats.skipped += 1;
                return;
            }
        };

        let Some(stream) = self.store.stream(&envelope.stream) else {
            warn!(stream = %envelope.stream, "skipping message for unknown stream");
            stats.skipped += 1;
            return;
        };

        let millis = chrono::Utc::now().timestamp_millis();
        let payload = envelope.payload().to_vec();
        let writer = stream.clone();
        let appended = spawn_blocking(move || append_record(&writer, millis, &payload)).await;
        match appended {
            Ok(Ok(key)) => {
                trace!(stream = stream.name(), key = %String::from_utf8_lossy(&key), "record stored");
                stats.accepted += 1;
            }
            Ok(Err(e)) => {
                error!(stream = stream.name(), millis, error = %e, "failed to store record; message dropped");
                stats.skipped += 1;
            }
            Err(e) => {
                error!(stream = stream.name(), millis, error = %e, "store write task failed; message dropped");
                stats.skipped += 1;
            }
        }
    }
}

#[async_trait]
impl FeedSource for UpstreamIngestor {
    async fn run(&self, cancel: &CancellationToken) -> IngestResult<()> {
        let url = self.subscription_url()?;
        info!(%url, "connecting upstream");

        let connect_timeout = self.config.connect_timeout();
        let dial = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            dial = timeout(connect_timeout, connect_async(url.as_str())) => dial,
        };
        let (mut ws, _response) = dial
            .map_err(|_| IngestError::Timeout {
                what: "connect",
                after: connect_timeout,
            })?
            .map_err(IngestError::Connect)?;
        info!("upstream connected");

        let read_timeout = self.config.read_timeout();
        let mut stats = IngestStats::default();
        let mut close = None;
        let outcome = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    close = Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    });
                    break Ok(());
                }
                next = timeout(read_timeout, ws.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    break Err(IngestError::Timeout {
                        what: "read",
                        after: read_timeout,
                    })
                }
                Ok(None) => {
                    break Err(IngestError::Closed {
                        reason: "stream ended without a close frame".into(),
                    })
                }
                Ok(Some(Err(e))) => break Err(IngestError::Transport(e)),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => self.accept(&text, &mut stats).await,
                Message::Binary(data) => {
                    debug!(len = data.len(), "skipping binary upstream frame");
                    stats.skipped += 1;
                }
                Message::Close(frame) => {
                    let reason = match frame {
                        Some(frame) => format!("{} {}", frame.code, frame.reason),
                        None => "no close frame payload".into(),
                    };
                    break Err(IngestError::Closed { reason });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        };

        if let Err(e) = ws.close(close).await {
            debug!(error = %e, "upstream close handshake failed");
        }
        info!(
            accepted = stats.accepted,
            skipped = stats.skipped,
            "upstream session ended"
        );
        outcome
    }
}
