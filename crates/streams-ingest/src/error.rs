use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors that end an upstream session.
///
/// Problems with a single message (bad envelope, unknown stream, failed
/// write) are logged and skipped; they never show up here.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The configured endpoint cannot be used for a subscription.
    #[error("invalid upstream endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The log store has no streams to subscribe to.
    #[error("no streams configured for the upstream subscription")]
    NoStreams,

    /// The websocket handshake failed.
    #[error("dial upstream: {0}")]
    Connect(#[source] tungstenite::Error),

    /// The connection failed after it was established.
    #[error("upstream connection error: {0}")]
    Transport(#[source] tungstenite::Error),

    /// A bounded wait expired.
    #[error("upstream {what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    /// The upstream ended the connection.
    #[error("upstream closed the connection: {reason}")]
    Closed { reason: String },

    /// The reconnect budget is spent.
    #[error("gave up after {attempts} rapid upstream attempts, last outcome: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Result alias for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;
