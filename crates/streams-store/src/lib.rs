//! Per-stream append-only ordered log storage.
//!
//! Every configured stream owns one RocksDB database under
//! `<root>/<stream-name>`. Records are immutable `(key, value)` pairs kept in
//! byte order of their keys; values are the raw payloads received from the
//! upstream feed.
//!
//! # Components
//!
//! - [`LogStore`] -- opened once at startup, owns every stream database
//! - [`LogStream`] -- cheap handle to one stream: `put`, `get`, `read`
//! - [`StreamReader`] -- snapshot-backed, resumable byte pull over a stream
//! - [`RecordFrames`] -- splits the reader's byte stream back into records
//!
//! # Design Rules
//!
//! 1. Records are never updated or deleted.
//! 2. Readers work on a snapshot taken when they are opened; later writes are
//!    invisible to them.
//! 3. Any number of readers may coexist with the single writer.
//! 4. A missing key is [`StoreError::NotFound`], never an engine error.

pub mod error;
pub mod reader;
pub mod store;

pub use error::{CloseFailure, StoreError, StoreResult};
pub use reader::{Pulled, Record, RecordFrames, StreamReader, SEPARATOR};
pub use store::{LogStore, LogStream, StoreOptions};
