use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CloseFailure, StoreError, StoreResult};
use crate::reader::StreamReader;

/// Engine tuning applied to every stream database.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Create a stream database when its directory does not exist yet.
    pub create_if_missing: bool,
    /// Maximum number of open files per stream database.
    pub max_open_files: Option<i32>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_open_files: Some(256),
        }
    }
}

impl StoreOptions {
    fn engine_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(self.create_if_missing);
        if let Some(max_files) = self.max_open_files {
            opts.set_max_open_files(max_files);
        }
        opts
    }
}

/// The set of stream logs, one ordered database per stream name.
///
/// Built once at startup and shared read-only afterwards (`Arc<LogStore>`);
/// the stream set never changes while the process runs.
pub struct LogStore {
    root: PathBuf,
    streams: HashMap<String, LogStream>,
}

impl LogStore {
    /// Open one database per stream under `root/<name>`.
    ///
    /// Any single failure aborts the call. Databases opened earlier in the
    /// same call are released when the partially built map is dropped.
    pub fn open<I, S>(names: I, root: impl AsRef<Path>, options: &StoreOptions) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let opts = options.engine_options();
        let mut streams = HashMap::new();
        for name in names {
            let name: String = name.into();
            if streams.contains_key(&name) {
                return Err(StoreError::DuplicateStream(name));
            }
            let path = root.join(&name);
            let db = DB::open(&opts, &path).map_err(|source| StoreError::Open {
                stream: name.clone(),
                source,
            })?;
            debug!(stream = %name, path = %path.display(), "stream database opened");
            let stream = LogStream {
                name: Arc::from(name.as_str()),
                db: Arc::new(db),
            };
            streams.insert(name, stream);
        }

        info!(root = %root.display(), streams = streams.len(), "log store opened");
        Ok(Self { root, streams })
    }

    /// Look up a stream by name. Unknown names yield `None`.
    pub fn stream(&self, name: &str) -> Option<LogStream> {
        self.streams.get(name).cloned()
    }

    /// Sorted list of every configured stream name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of configured streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns `true` if no stream is configured.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Directory holding the stream databases.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush and release every stream database.
    ///
    /// A failing stream does not stop the others from being closed; all
    /// failures are reported together.
    pub fn close(self) -> StoreResult<()> {
        let mut streams: Vec<(String, LogStream)> = self.streams.into_iter().collect();
        streams.sort_by(|a, b| a.0.cmp(&b.0));

        collect_close(streams.into_iter().map(|(name, stream)| {
            let flushed = stream.db.flush();
            if Arc::strong_count(&stream.db) > 1 {
                warn!(stream = %name, "stream still referenced at close; release deferred");
            }
            drop(stream);
            debug!(stream = %name, "stream database closed");
            (name, flushed)
        }))
    }
}

/// Drive every close attempt to the end and report all failures together.
fn collect_close<I>(attempts: I) -> StoreResult<()>
where
    I: IntoIterator<Item = (String, Result<(), rocksdb::Error>)>,
{
    let mut failures = Vec::new();
    for (stream, result) in attempts {
        if let Err(source) = result {
            warn!(stream = %stream, error = %source, "flush on close failed");
            failures.push(CloseFailure { stream, source });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Close(failures))
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("root", &self.root)
            .field("streams", &self.list())
            .finish()
    }
}

/// Handle to a single stream log.
///
/// Cloning is cheap; all clones refer to the same database.
#[derive(Clone)]
pub struct LogStream {
    name: Arc<str>,
    db: Arc<DB>,
}

impl LogStream {
    /// Name of the stream.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a record.
    pub fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    /// Fetch the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    pub fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.db
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_vec()))
    }

    /// Open a reader over a snapshot of the stream taken now.
    pub fn read(&self) -> StreamReader<'_> {
        StreamReader::new(self.db.snapshot())
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_abc(dir: &Path) -> LogStore {
        LogStore::open(["a", "b", "c"], dir, &StoreOptions::default()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Open / lookup
    // -----------------------------------------------------------------------

    #[test]
    fn open_creates_one_database_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_abc(dir.path());

        assert_eq!(store.len(), 3);
        for name in ["a", "b", "c"] {
            assert!(dir.path().join(name).is_dir(), "missing directory for {name}");
        }
        store.close().unwrap();
    }

    #[test]
    fn list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(["c", "a", "b"], dir.path(), &StoreOptions::default()).unwrap();
        assert_eq!(store.list(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_stream_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_abc(dir.path());
        assert!(store.stream("d").is_none());
        assert_eq!(store.stream("a").unwrap().name(), "a");
    }

    #[test]
    fn duplicate_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = LogStore::open(["a", "a"], dir.path(), &StoreOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStream(name) if name == "a"));
    }

    #[test]
    fn failed_open_aborts_and_releases_earlier_streams() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the database directory should be.
        std::fs::write(dir.path().join("b"), b"not a database").unwrap();

        let err = LogStore::open(["a", "b"], dir.path(), &StoreOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::Open { ref stream, .. } if stream == "b"));

        // Stream "a" was released, so it can be opened again right away.
        let store = LogStore::open(["a"], dir.path(), &StoreOptions::default()).unwrap();
        store.close().unwrap();
    }

    #[test]
    fn missing_database_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            create_if_missing: false,
            ..StoreOptions::default()
        };
        assert!(LogStore::open(["a"], dir.path(), &options).is_err());
    }

    // -----------------------------------------------------------------------
    // Put / get
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_abc(dir.path());
        let key = "ключ_1".as_bytes();
        let value = "привет мир!".as_bytes();

        for name in store.list() {
            let stream = store.stream(&name).unwrap();
            stream.put(key, value).unwrap();
            assert_eq!(stream.get(key).unwrap(), value);
        }
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_abc(dir.path());
        let err = store.stream("a").unwrap().get(b"nope").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StoreError::NotFound(ref key) if key == b"nope"));
    }

    #[test]
    fn streams_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_abc(dir.path());
        store.stream("a").unwrap().put(b"1", b"x").unwrap();
        assert!(store.stream("b").unwrap().get(b"1").unwrap_err().is_not_found());
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    #[test]
    fn records_survive_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_abc(dir.path());
            store.stream("a").unwrap().put(b"1", b"x").unwrap();
            store.close().unwrap();
        }
        let store = open_abc(dir.path());
        assert_eq!(store.stream("a").unwrap().get(b"1").unwrap(), b"x");
        store.close().unwrap();
    }

    /// A real engine error: opening a database where a regular file sits.
    fn engine_error(dir: &Path) -> rocksdb::Error {
        let path = dir.join("not-a-db");
        std::fs::write(&path, b"file").unwrap();
        match DB::open_default(&path) {
            Err(e) => e,
            Ok(_) => panic!("opened a database over a regular file"),
        }
    }

    #[test]
    fn close_failure_does_not_stop_other_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut failing = Some(engine_error(dir.path()));
        let mut attempted = Vec::new();

        let attempts = ["a", "b", "c"].into_iter().map(|name| {
            attempted.push(name);
            let result = match (name, failing.take()) {
                ("a", Some(e)) => Err(e),
                _ => Ok(()),
            };
            (name.to_string(), result)
        });
        let err = collect_close(attempts).unwrap_err();

        assert_eq!(attempted, vec!["a", "b", "c"]);
        match &err {
            StoreError::Close(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].stream, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("failed to close 1 stream(s): stream=a: "));
    }

    #[test]
    fn close_without_failures_is_ok() {
        let attempts = ["a", "b"].map(|name| (name.to_string(), Ok(())));
        assert!(collect_close(attempts).is_ok());
    }

    #[test]
    fn default_options() {
        let options = StoreOptions::default();
        assert!(options.create_if_missing);
        assert_eq!(options.max_open_files, Some(256));
    }
}
