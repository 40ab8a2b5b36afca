//! Upstream ingestion for the stream recorder.
//!
//! Keeps one websocket subscription open to the market feed for every
//! configured stream, demultiplexes the combined envelopes and appends each
//! payload to its stream log under a collision-free timestamp key.
//!
//! Sessions never retry on their own. Reconnecting is driven by
//! [`run_with_retry`] and its [`RetryState`] policy.

pub mod config;
pub mod envelope;
pub mod error;
pub mod ingestor;
pub mod keys;
pub mod retry;

pub use config::UpstreamConfig;
pub use envelope::{subscription_url, Envelope};
pub use error::{IngestError, IngestResult};
pub use ingestor::{FeedSource, IngestStats, UpstreamIngestor};
pub use keys::{append_record, record_key};
pub use retry::{run_with_retry, RetryDecision, RetryState};
