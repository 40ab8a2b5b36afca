/// Errors from log store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key does not exist in the stream.
    #[error("key not found: {}", String::from_utf8_lossy(.0))]
    NotFound(Vec<u8>),

    /// Failure reported by the underlying ordered-store engine.
    #[error("storage engine error: {0}")]
    Engine(#[from] rocksdb::Error),

    /// Opening a stream database failed.
    #[error("open stream={stream}: {source}")]
    Open {
        stream: String,
        #[source]
        source: rocksdb::Error,
    },

    /// The same stream name was configured twice.
    #[error("stream {0} is configured more than once")]
    DuplicateStream(String),

    /// One or more streams failed to close cleanly.
    #[error("failed to close {} stream(s): {}", .0.len(), join_failures(.0))]
    Close(Vec<CloseFailure>),

    /// I/O error while preparing the storage root.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for the recoverable missing-key outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A single stream that could not be closed.
#[derive(Debug, thiserror::Error)]
#[error("stream={stream}: {source}")]
pub struct CloseFailure {
    pub stream: String,
    #[source]
    pub source: rocksdb::Error,
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
