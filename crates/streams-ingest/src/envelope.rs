use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::{IngestError, IngestResult};

/// Outer wrapper of a combined-stream message.
///
/// `data` is kept as raw JSON text so the payload is stored exactly as it was
/// received.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub stream: String,
    pub data: Box<RawValue>,
}

impl Envelope {
    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Payload bytes to persist.
    pub fn payload(&self) -> &[u8] {
        self.data.get().as_bytes()
    }
}

/// Build the subscription address covering every stream in `names`.
///
/// `names` is expected in [`LogStore::list`] order so the address is stable
/// across reconnects.
///
/// [`LogStore::list`]: streams_store::LogStore::list
pub fn subscription_url(endpoint: &str, names: &[String]) -> IngestResult<String> {
    if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
        return Err(IngestError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "scheme must be ws:// or wss://".into(),
        });
    }
    if endpoint.contains('?') {
        return Err(IngestError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "endpoint must not carry a query".into(),
        });
    }
    if names.is_empty() {
        return Err(IngestError::NoStreams);
    }
    Ok(format!("{endpoint}?streams={}", names.join("/")))
}
