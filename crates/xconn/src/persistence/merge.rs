// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timestamp-ordered merge across multiple persisted streams.
//!
//! Feeds records from several [`Reader`]s out in non-decreasing
//! `timestamp_ms` order, the way a k-way merge sort interleaves sorted runs.
//! A stream with nothing currently available is skipped rather than stalling
//! the merge; it is re-checked on the next call.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use super::format::LogRecord;
use super::reader::Reader;
use crate::error::Result;

struct HeapEntry {
    record: LogRecord,
    stream_index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.timestamp_ms == other.record.timestamp_ms
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest timestamp sorts
        // to the top.
        other.record.timestamp_ms.cmp(&self.record.timestamp_ms)
    }
}

/// Merges records across `readers` in non-decreasing timestamp order.
///
/// Each call to [`next`](MergeReader::next) pulls at most one record from
/// each stream that does not already have a pending entry buffered, picks
/// the smallest timestamp among what's buffered, and returns it. Streams
/// with nothing available are simply absent from the heap until they have
/// something; they never block the others.
pub struct MergeReader<'a, 's> {
    readers: Vec<&'a mut Reader<'s>>,
    heap: BinaryHeap<HeapEntry>,
    primed: Vec<bool>,
}

impl<'a, 's> MergeReader<'a, 's> {
    pub fn new(readers: Vec<&'a mut Reader<'s>>) -> Self {
        let n = readers.len();
        Self {
            readers,
            heap: BinaryHeap::new(),
            primed: vec![false; n],
        }
    }

    fn refill(&mut self) -> Result<()> {
        for (i, reader) in self.readers.iter_mut().enumerate() {
            if self.primed[i] {
                continue;
            }
            if let Some(rec) = reader.try_poll()? {
                self.heap.push(HeapEntry {
                    record: rec,
                    stream_index: i,
                });
                self.primed[i] = true;
            }
        }
        Ok(())
    }

    /// Return the next record in timestamp order, or `None` if every stream
    /// is currently dry.
    pub fn next(&mut self) -> Result<Option<(usize, LogRecord)>> {
        self.refill()?;
        match self.heap.pop() {
            Some(entry) => {
                self.primed[entry.stream_index] = false;
                Ok(Some((entry.stream_index, entry.record)))
            }
            None => Ok(None),
        }
    }

    /// Like [`next`](Self::next), but waits up to `timeout` total for any
    /// stream to produce a record before giving up.
    pub fn next_blocking(&mut self, timeout: Duration) -> Result<Option<(usize, LogRecord)>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.next()? {
                return Ok(Some(found));
            }
            if std::time::Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Drain everything currently buffered across all streams, in order.
    pub fn drain_available(&mut self, mut callback: impl FnMut(usize, &LogRecord)) -> Result<usize> {
        let mut count = 0;
        while let Some((idx, rec)) = self.next()? {
            callback(idx, &rec);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::format::Direction;
    use crate::persistence::reader::StartPosition;
    use crate::persistence::store::{Store, StoreConfig};
    use tempfile::tempdir;

    fn new_store(dir: &std::path::Path) -> Store {
        Store::open(StoreConfig {
            root: dir.to_path_buf(),
            max_segment_bytes: 64 * 1024 * 1024,
        })
        .unwrap()
    }

    #[test]
    fn merges_two_streams_in_timestamp_order() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());

        store.append("A", 10, Direction::Inbound, vec![], b"a0".to_vec()).unwrap();
        store.append("A", 30, Direction::Inbound, vec![], b"a1".to_vec()).unwrap();
        store.append("B", 20, Direction::Inbound, vec![], b"b0".to_vec()).unwrap();
        store.append("B", 40, Direction::Inbound, vec![], b"b1".to_vec()).unwrap();

        let mut ra = Reader::open(&store, "A", StartPosition::Start).unwrap();
        let mut rb = Reader::open(&store, "B", StartPosition::Start).unwrap();
        let mut merge = MergeReader::new(vec![&mut ra, &mut rb]);

        let mut order = Vec::new();
        while let Some((_, rec)) = merge.next().unwrap() {
            order.push(rec.raw.clone());
        }
        assert_eq!(
            order,
            vec![b"a0".to_vec(), b"b0".to_vec(), b"a1".to_vec(), b"b1".to_vec()]
        );
    }

    #[test]
    fn empty_stream_is_skipped_without_stalling() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        store.append("A", 1, Direction::Inbound, vec![], b"only".to_vec()).unwrap();

        let mut ra = Reader::open(&store, "A", StartPosition::Start).unwrap();
        let mut rb = Reader::open(&store, "B", StartPosition::Start).unwrap();
        let mut merge = MergeReader::new(vec![&mut ra, &mut rb]);

        let (idx, rec) = merge.next().unwrap().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(rec.raw, b"only");
        assert_eq!(merge.next().unwrap(), None);
    }

    #[test]
    fn timestamps_never_decrease_across_the_merged_sequence() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        for (stream, ts) in [("A", 2), ("B", 1), ("A", 5), ("B", 3), ("A", 9)] {
            store.append(stream, ts, Direction::Outbound, vec![], vec![]).unwrap();
        }
        let mut ra = Reader::open(&store, "A", StartPosition::Start).unwrap();
        let mut rb = Reader::open(&store, "B", StartPosition::Start).unwrap();
        let mut merge = MergeReader::new(vec![&mut ra, &mut rb]);

        let mut last_ts = 0u64;
        let mut count = 0;
        while let Some((_, rec)) = merge.next().unwrap() {
            assert!(rec.timestamp_ms >= last_ts);
            last_ts = rec.timestamp_ms;
            count += 1;
        }
        assert_eq!(count, 5);
    }
}
