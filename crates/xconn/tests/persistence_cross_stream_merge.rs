// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Three independently-appended streams, read back as one timestamp-ordered
//! sequence via `MergeReader` — the shape a replay tool uses to reconstruct
//! a single chronological view across sessions.

use tempfile::tempdir;
use xconn::persistence::{Direction, MergeReader, Reader, StartPosition, Store, StoreConfig};

#[test]
fn three_streams_with_interleaved_timestamps_merge_into_one_ordered_walk() {
    let dir = tempdir().unwrap();
    let store = Store::open(StoreConfig { root: dir.path().to_path_buf(), max_segment_bytes: 64 * 1024 * 1024 }).unwrap();

    // A: 10, 40, 70 -- B: 20, 50, 80 -- C: 30, 60, 90
    for (stream, ts, tag) in [
        ("A", 10u64, "a0"), ("A", 40, "a1"), ("A", 70, "a2"),
        ("B", 20, "b0"), ("B", 50, "b1"), ("B", 80, "b2"),
        ("C", 30, "c0"), ("C", 60, "c1"), ("C", 90, "c2"),
    ] {
        store.append(stream, ts, Direction::Inbound, vec![], tag.as_bytes().to_vec()).unwrap();
    }

    let mut ra = Reader::open(&store, "A", StartPosition::Start).unwrap();
    let mut rb = Reader::open(&store, "B", StartPosition::Start).unwrap();
    let mut rc = Reader::open(&store, "C", StartPosition::Start).unwrap();
    let mut merge = MergeReader::new(vec![&mut ra, &mut rb, &mut rc]);

    let mut seen = Vec::new();
    while let Some((idx, rec)) = merge.next().unwrap() {
        seen.push((idx, rec.timestamp_ms, String::from_utf8(rec.raw).unwrap()));
    }

    assert_eq!(
        seen,
        vec![
            (0, 10, "a0".to_string()),
            (1, 20, "b0".to_string()),
            (2, 30, "c0".to_string()),
            (0, 40, "a1".to_string()),
            (1, 50, "b1".to_string()),
            (2, 60, "c1".to_string()),
            (0, 70, "a2".to_string()),
            (1, 80, "b2".to_string()),
            (2, 90, "c2".to_string()),
        ]
    );
}

#[test]
fn drain_available_reports_every_record_across_streams_once() {
    let dir = tempdir().unwrap();
    let store = Store::open(StoreConfig { root: dir.path().to_path_buf(), max_segment_bytes: 64 * 1024 * 1024 }).unwrap();

    for (stream, ts) in [("A", 1u64), ("B", 2), ("A", 3), ("B", 4), ("A", 5)] {
        store.append(stream, ts, Direction::Outbound, vec![], vec![]).unwrap();
    }

    let mut ra = Reader::open(&store, "A", StartPosition::Start).unwrap();
    let mut rb = Reader::open(&store, "B", StartPosition::Start).unwrap();
    let mut merge = MergeReader::new(vec![&mut ra, &mut rb]);

    let mut count = 0;
    let total = merge
        .drain_available(|_idx, _rec| {
            count += 1;
        })
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(count, 5);
    assert_eq!(merge.next().unwrap(), None);
}
