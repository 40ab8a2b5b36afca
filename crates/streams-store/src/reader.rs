use std::io::{self, BufRead, BufReader};

use bytes::{Buf, BytesMut};
use rocksdb::{DBIterator, Direction, IteratorMode, ReadOptions, Snapshot};

use crate::error::StoreResult;

/// Byte written after every key and every value in the reader's output.
///
/// Keys and values must not contain it; this is not checked.
pub const SEPARATOR: u8 = b'\n';

/// Outcome of a single [`StreamReader::pull`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pulled {
    /// Number of bytes copied into the caller's buffer.
    pub len: usize,
    /// `true` once every record has been delivered.
    pub exhausted: bool,
}

/// Incremental byte reader over a snapshot of one stream.
///
/// Records are emitted in ascending key order as
/// `key SEPARATOR value SEPARATOR`. The reader keeps an explicit
/// `{cursor, pending, exhausted}` state; each [`pull`](Self::pull) first
/// fills `pending` from the cursor until it covers the caller's buffer, then
/// drains into it.
///
/// Reading never blocks writers and never observes writes made after the
/// reader was opened.
pub struct StreamReader<'a> {
    // Declared before `snapshot` so the iterator is released first.
    iter: Option<DBIterator<'a>>,
    snapshot: Snapshot<'a>,
    pending: BytesMut,
    exhausted: bool,
}

impl<'a> StreamReader<'a> {
    pub(crate) fn new(snapshot: Snapshot<'a>) -> Self {
        Self {
            iter: None,
            snapshot,
            pending: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Restart from the beginning of `[lower, upper)`.
    ///
    /// `None` leaves that side unbounded. Bytes buffered but not yet
    /// delivered are discarded.
    pub fn range(&mut self, lower: Option<&[u8]>, upper: Option<&[u8]>) {
        let mut opts = ReadOptions::default();
        if let Some(lower) = lower {
            opts.set_iterate_lower_bound(lower.to_vec());
        }
        if let Some(upper) = upper {
            opts.set_iterate_upper_bound(upper.to_vec());
        }
        self.iter = Some(self.snapshot.iterator_opt(IteratorMode::Start, opts));
        self.pending.clear();
        self.exhausted = false;
    }

    /// Move the cursor to the first record with a key `>= key`.
    ///
    /// Returns `false` if no such record exists in the current range.
    pub fn seek(&mut self, key: &[u8]) -> StoreResult<bool> {
        if self.iter.is_none() {
            self.range(None, None);
        }
        self.pending.clear();
        self.exhausted = false;
        if let Some(iter) = self.iter.as_mut() {
            iter.set_mode(IteratorMode::From(key, Direction::Forward));
        }
        self.advance()?;
        Ok(!self.exhausted)
    }

    /// Copy the next bytes of the stream into `buf`.
    ///
    /// Returns fewer bytes than `buf.len()` only when the stream has run out.
    /// `exhausted` is reported once nothing is left to deliver.
    pub fn pull(&mut self, buf: &mut [u8]) -> StoreResult<Pulled> {
        if self.iter.is_none() {
            self.range(None, None);
        }

        while self.pending.len() < buf.len() && !self.exhausted {
            self.advance()?;
        }

        let len = self.pending.len().min(buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.advance(len);

        Ok(Pulled {
            len,
            exhausted: self.exhausted && self.pending.is_empty(),
        })
    }

    /// Release the iterator and then the snapshot.
    pub fn close(self) {
        let Self { iter, snapshot, .. } = self;
        drop(iter);
        drop(snapshot);
    }

    /// Step the cursor once, appending the record to `pending`.
    fn advance(&mut self) -> StoreResult<()> {
        let Some(iter) = self.iter.as_mut() else {
            self.exhausted = true;
            return Ok(());
        };
        match iter.next() {
            Some(Ok((key, value))) => {
                self.pending.reserve(key.len() + value.len() + 2);
                self.pending.extend_from_slice(&key);
                self.pending.extend_from_slice(&[SEPARATOR]);
                self.pending.extend_from_slice(&value);
                self.pending.extend_from_slice(&[SEPARATOR]);
            }
            Some(Err(e)) => return Err(e.into()),
            None => self.exhausted = true,
        }
        Ok(())
    }
}

impl io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf).map(|pulled| pulled.len).map_err(io::Error::other)
    }
}

/// One stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Splits a reader's byte stream back into records.
///
/// Tokens alternate key, value. A key with no following value is reported
/// as [`io::ErrorKind::UnexpectedEof`]. Iteration stops after the first
/// error.
pub struct RecordFrames<R> {
    tokens: io::Split<R>,
    failed: bool,
}

impl<R: BufRead> RecordFrames<R> {
    pub fn new(input: R) -> Self {
        Self {
            tokens: input.split(SEPARATOR),
            failed: false,
        }
    }
}

impl<'a> RecordFrames<BufReader<StreamReader<'a>>> {
    /// Frame a stream reader through an internal buffer.
    pub fn from_reader(reader: StreamReader<'a>) -> Self {
        Self::new(BufReader::new(reader))
    }
}

impl<R: BufRead> Iterator for RecordFrames<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = match self.tokens.next()? {
            Ok(key) => match self.tokens.next() {
                Some(Ok(value)) => Ok(Record { key, value }),
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "record key without value",
                )),
            },
            Err(e) => Err(e),
        };
        self.failed = item.is_err();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogStore, LogStream, StoreOptions};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::io::Read;

    fn open_single(dir: &std::path::Path) -> (LogStore, LogStream) {
        let store = LogStore::open(["a"], dir, &StoreOptions::default()).unwrap();
        let stream = store.stream("a").unwrap();
        (store, stream)
    }

    /// Deterministic printable payload of `len` bytes.
    fn payload(seed: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| b'A' + ((seed * 31 + i * 7) % 26) as u8).collect()
    }

    /// Drain a reader with a fixed buffer size, returning everything read.
    fn drain(reader: &mut StreamReader<'_>, buf_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let pulled = reader.pull(&mut buf).unwrap();
            out.extend_from_slice(&buf[..pulled.len]);
            if pulled.exhausted {
                return out;
            }
            assert!(pulled.len > 0, "no progress without exhaustion");
        }
    }

    fn records_of(bytes: &[u8]) -> Vec<Record> {
        RecordFrames::new(bytes).collect::<io::Result<Vec<_>>>().unwrap()
    }

    // -----------------------------------------------------------------------
    // Round trip
    // -----------------------------------------------------------------------

    #[test]
    fn full_scan_round_trip_for_every_buffer_size() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());

        let mut expected = BTreeMap::new();
        for i in 0..40 {
            let key = format!("{:016}", 1_700_000_000_000u64 + i as u64 * 13).into_bytes();
            let value = payload(i, 1 + (i * 17) % 96);
            stream.put(&key, &value).unwrap();
            expected.insert(key, value);
        }
        let largest = expected.values().map(Vec::len).max().unwrap();

        for buf_size in 1..=largest {
            let mut reader = stream.read();
            let records = records_of(&drain(&mut reader, buf_size));
            reader.close();

            assert_eq!(records.len(), expected.len(), "buffer size {buf_size}");
            for (record, (key, value)) in records.iter().zip(expected.iter()) {
                assert_eq!(&record.key, key, "buffer size {buf_size}");
                assert_eq!(&record.value, value, "buffer size {buf_size}");
            }
        }
    }

    #[test]
    fn empty_stream_is_exhausted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        let mut reader = stream.read();
        let mut buf = [0u8; 8];
        assert_eq!(
            reader.pull(&mut buf).unwrap(),
            Pulled { len: 0, exhausted: true }
        );
    }

    #[test]
    fn exhaustion_reported_with_last_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        stream.put(b"1", b"x").unwrap();

        let mut reader = stream.read();
        let mut buf = [0u8; 16];
        let pulled = reader.pull(&mut buf).unwrap();
        assert_eq!(pulled, Pulled { len: 4, exhausted: true });
        assert_eq!(&buf[..4], b"1\nx\n");
    }

    #[test]
    fn io_read_composes_with_read_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        stream.put(b"2", b"y").unwrap();
        stream.put(b"1", b"x").unwrap();

        let mut out = Vec::new();
        stream.read().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"1\nx\n2\ny\n");
    }

    // -----------------------------------------------------------------------
    // Snapshot isolation and release
    // -----------------------------------------------------------------------

    #[test]
    fn reader_ignores_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        stream.put(b"1", b"x").unwrap();

        let mut reader = stream.read();
        stream.put(b"2", b"y").unwrap();

        let records = records_of(&drain(&mut reader, 3));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, b"x");
    }

    #[test]
    fn release_does_not_disturb_later_readers() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        stream.put(b"1", b"x").unwrap();
        stream.put(b"2", b"y").unwrap();

        let mut first = stream.read();
        let mut buf = [0u8; 2];
        first.pull(&mut buf).unwrap();
        first.close();

        let mut second = stream.read();
        assert_eq!(drain(&mut second, 5), b"1\nx\n2\ny\n");
        second.close();

        let mut third = stream.read();
        assert_eq!(drain(&mut third, 64), b"1\nx\n2\ny\n");
    }

    // -----------------------------------------------------------------------
    // Range and seek
    // -----------------------------------------------------------------------

    #[test]
    fn range_limits_keys_and_discards_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        for (k, v) in [(b"1", b"a"), (b"2", b"b"), (b"3", b"c"), (b"4", b"d")] {
            stream.put(k, v).unwrap();
        }

        let mut reader = stream.read();
        let mut buf = [0u8; 1];
        reader.pull(&mut buf).unwrap();

        reader.range(Some(&b"2"[..]), Some(&b"4"[..]));
        let values: Vec<_> = records_of(&drain(&mut reader, 7))
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn seek_positions_at_first_key_not_below() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        for (k, v) in [(b"10", b"a"), (b"20", b"b"), (b"30", b"c")] {
            stream.put(k, v).unwrap();
        }

        let mut reader = stream.read();
        assert!(reader.seek(b"15").unwrap());
        assert_eq!(drain(&mut reader, 4), b"20\nb\n30\nc\n");

        assert!(!reader.seek(b"99").unwrap());
        let mut buf = [0u8; 4];
        assert!(reader.pull(&mut buf).unwrap().exhausted);
    }

    // -----------------------------------------------------------------------
    // Framing
    // -----------------------------------------------------------------------

    #[test]
    fn frames_keep_empty_values() {
        let records = records_of(b"1\n\n2\nz\n");
        assert_eq!(records[0], Record { key: b"1".to_vec(), value: Vec::new() });
        assert_eq!(records[1].value, b"z");
    }

    #[test]
    fn dangling_key_is_unexpected_eof() {
        let mut frames = RecordFrames::new(&b"1\nx\n2\n"[..]);
        assert!(frames.next().unwrap().is_ok());
        let err = frames.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(frames.next().is_none());
    }

    #[test]
    fn frames_over_store_reader() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, stream) = open_single(dir.path());
        stream.put(b"1", b"x").unwrap();
        stream.put(b"2", b"y").unwrap();

        let mut frames = RecordFrames::from_reader(stream.read());
        assert_eq!(frames.next().unwrap().unwrap().value, b"x");
        assert_eq!(frames.next().unwrap().unwrap().value, b"y");
        assert!(frames.next().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn any_records_round_trip(
            entries in prop::collection::btree_map(
                "[0-9A-Za-z_-]{1,24}",
                "[ -~]{0,200}",
                0..40,
            ),
            buf_size in 1usize..300,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let (_store, stream) = open_single(dir.path());
            for (key, value) in &entries {
                stream.put(key.as_bytes(), value.as_bytes()).unwrap();
            }

            let mut reader = stream.read();
            let records = records_of(&drain(&mut reader, buf_size));

            prop_assert_eq!(records.len(), entries.len());
            for (record, (key, value)) in records.iter().zip(entries.iter()) {
                prop_assert_eq!(&record.key, key.as_bytes());
                prop_assert_eq!(&record.value, value.as_bytes());
            }
        }
    }
}
