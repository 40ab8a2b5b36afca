//! Record keys.
//!
//! A key is the decimal receive time in milliseconds since the epoch. When
//! that key is already taken in the stream (two events in the same
//! millisecond) a `-N` suffix is added, counting up from 1 until a free key
//! is found.
//!
//! Keys sort as bytes, so order is chronological only while the timestamp
//! keeps the same number of digits and collision counters stay below 10.

use streams_store::{LogStream, StoreError, StoreResult};
use tracing::trace;

/// Encode the key for `millis` and the given collision counter.
pub fn record_key(millis: i64, collision: u32) -> Vec<u8> {
    if collision == 0 {
        millis.to_string().into_bytes()
    } else {
        format!("{millis}-{collision}").into_bytes()
    }
}

/// Store `value` under the first free key for `millis`; returns that key.
///
/// The search for a free key is unbounded.
pub fn append_record(stream: &LogStream, millis: i64, value: &[u8]) -> StoreResult<Vec<u8>> {
    let mut collision = 0u32;
    loop {
        let key = record_key(millis, collision);
        match stream.get(&key) {
            Err(StoreError::NotFound(_)) => {
                stream.put(&key, value)?;
                return Ok(key);
            }
            Ok(_) => {
                trace!(stream = stream.name(), millis, collision, "key collision");
                collision += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streams_store::{LogStore, StoreOptions};

    #[test]
    fn key_encoding() {
        assert_eq!(record_key(1_700_000_000_123, 0), b"1700000000123");
        assert_eq!(record_key(1_700_000_000_123, 2), b"1700000000123-2");
    }

    #[test]
    fn keys_sort_chronologically_for_small_counters() {
        let mut keys = vec![
            record_key(1_700_000_000_001, 0),
            record_key(1_700_000_000_000, 9),
            record_key(1_700_000_000_000, 1),
            record_key(1_700_000_000_000, 0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                record_key(1_700_000_000_000, 0),
                record_key(1_700_000_000_000, 1),
                record_key(1_700_000_000_000, 9),
                record_key(1_700_000_000_001, 0),
            ]
        );
    }

    #[test]
    fn same_millisecond_events_get_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(["a"], dir.path(), &StoreOptions::default()).unwrap();
        let stream = store.stream("a").unwrap();

        let k1 = append_record(&stream, 42, b"first").unwrap();
        let k2 = append_record(&stream, 42, b"second").unwrap();
        let k3 = append_record(&stream, 42, b"third").unwrap();

        assert_eq!(k1, b"42");
        assert_eq!(k2, b"42-1");
        assert_eq!(k3, b"42-2");
        assert_eq!(stream.get(&k1).unwrap(), b"first");
        assert_eq!(stream.get(&k2).unwrap(), b"second");
        assert_eq!(stream.get(&k3).unwrap(), b"third");
    }

    #[test]
    fn collisions_are_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(["a", "b"], dir.path(), &StoreOptions::default()).unwrap();

        let ka = append_record(&store.stream("a").unwrap(), 7, b"x").unwrap();
        let kb = append_record(&store.stream("b").unwrap(), 7, b"y").unwrap();
        assert_eq!(ka, kb);
    }
}
