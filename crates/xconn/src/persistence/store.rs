// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only per-stream persistence store.
//!
//! One directory per stream under the store's root; each directory holds a
//! sequence of numbered segment files (`00000001.seg`, `00000002.seg`, ...),
//! rolled when a segment would exceed the configured maximum size. Writes to
//! a single stream are serialized by a per-stream lock (single-writer
//! discipline); different streams may be written concurrently.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use parking_lot::RwLock;

use super::format::{Direction, LogRecord, SegmentHeader, FORMAT_VERSION};
use crate::error::{Error, Result};

/// Store-wide configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    /// Roll to a new segment once the current one reaches this size.
    pub max_segment_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            max_segment_bytes: 64 * 1024 * 1024,
        }
    }
}

struct StreamWriter {
    dir: PathBuf,
    file: BufWriter<File>,
    segment_index: u32,
    segment_bytes: u64,
    next_seqnum: u32,
    max_segment_bytes: u64,
}

impl StreamWriter {
    fn open(root: &Path, stream: &str, max_segment_bytes: u64) -> Result<Self> {
        let dir = root.join(sanitize(stream));
        fs::create_dir_all(&dir).map_err(|e| Error::Persistence(e.to_string()))?;

        let (segment_index, next_seqnum) = latest_segment(&dir)?;
        let path = segment_path(&dir, segment_index);
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let segment_bytes = file
            .metadata()
            .map_err(|e| Error::Persistence(e.to_string()))?
            .len();

        if is_new {
            let header = SegmentHeader {
                version: FORMAT_VERSION,
                first_seqnum: next_seqnum,
            };
            let mut buf = Vec::new();
            header.write_to(&mut buf).map_err(|e| Error::Persistence(e.to_string()))?;
            file.write_all(&buf).map_err(|e| Error::Persistence(e.to_string()))?;
        }

        Ok(Self {
            dir,
            file: BufWriter::new(file),
            segment_index,
            segment_bytes: segment_bytes.max(if is_new { SegmentHeader::ENCODED_LEN as u64 } else { segment_bytes }),
            next_seqnum,
            max_segment_bytes,
        })
    }

    fn roll_if_needed(&mut self, incoming_len: u64) -> Result<()> {
        if self.segment_bytes + incoming_len <= self.max_segment_bytes {
            return Ok(());
        }
        self.file.flush().map_err(|e| Error::Persistence(e.to_string()))?;
        self.segment_index += 1;
        let path = segment_path(&self.dir, self.segment_index);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let header = SegmentHeader {
            version: FORMAT_VERSION,
            first_seqnum: self.next_seqnum,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).map_err(|e| Error::Persistence(e.to_string()))?;
        file.write_all(&buf).map_err(|e| Error::Persistence(e.to_string()))?;
        self.segment_bytes = buf.len() as u64;
        self.file = BufWriter::new(file);
        Ok(())
    }

    fn append(&mut self, mut record: LogRecord) -> Result<u32> {
        record.seqnum = self.next_seqnum;
        let len = record.encoded_len() as u64;
        self.roll_if_needed(len)?;

        let mut buf = Vec::with_capacity(len as usize);
        record.write_to(&mut buf).map_err(|e| Error::Persistence(e.to_string()))?;
        self.file.write_all(&buf).map_err(|e| Error::Persistence(e.to_string()))?;
        self.segment_bytes += buf.len() as u64;

        let seq = self.next_seqnum;
        self.next_seqnum += 1;
        Ok(seq)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| Error::Persistence(e.to_string()))?;
        self.file
            .get_ref()
            .sync_data()
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}

fn sanitize(stream: &str) -> String {
    stream
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn segment_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{index:08}.seg"))
}

/// Scan `dir` for the highest-numbered segment; return `(segment_index,
/// next_seqnum)`. `next_seqnum` is derived by reading the tail of the
/// highest segment so reopen after a restart resumes exactly where writes
/// left off.
fn latest_segment(dir: &Path) -> Result<(u32, u32)> {
    let mut highest = 0u32;
    let mut found_any = false;
    for entry in fs::read_dir(dir).map_err(|e| Error::Persistence(e.to_string()))? {
        let entry = entry.map_err(|e| Error::Persistence(e.to_string()))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = name.strip_suffix(".seg") {
                if let Ok(idx) = stem.parse::<u32>() {
                    found_any = true;
                    highest = highest.max(idx);
                }
            }
        }
    }
    if !found_any {
        return Ok((1, 1));
    }
    let path = segment_path(dir, highest);
    let next_seqnum = last_seqnum_in_segment(&path)?.map_or(1, |s| s + 1);
    Ok((highest, next_seqnum))
}

fn last_seqnum_in_segment(path: &Path) -> Result<Option<u32>> {
    let file = File::open(path).map_err(|e| Error::Persistence(e.to_string()))?;
    let mut reader = BufReader::new(file);
    SegmentHeader::read_from(&mut reader).map_err(|e| Error::Persistence(e.to_string()))?;
    let mut last = None;
    while let Some(rec) = LogRecord::read_from(&mut reader).map_err(|e| Error::Persistence(e.to_string()))? {
        last = Some(rec.seqnum);
    }
    Ok(last)
}

/// Append-only persistence store with per-stream single-writer discipline.
pub struct Store {
    config: StoreConfig,
    writers: RwLock<HashMap<String, Mutex<StreamWriter>>>,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root).map_err(|e| Error::Persistence(e.to_string()))?;
        Ok(Self {
            config,
            writers: RwLock::new(HashMap::new()),
        })
    }

    fn with_writer<T>(&self, stream: &str, f: impl FnOnce(&mut StreamWriter) -> Result<T>) -> Result<T> {
        if !self.writers.read().contains_key(stream) {
            let mut writers = self.writers.write();
            if !writers.contains_key(stream) {
                let writer = StreamWriter::open(&self.config.root, stream, self.config.max_segment_bytes)?;
                writers.insert(stream.to_string(), Mutex::new(writer));
            }
        }
        let writers = self.writers.read();
        let writer = writers.get(stream).expect("writer present after insert");
        let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Append one entry to `stream`. Returns the assigned sequence number.
    pub fn append(
        &self,
        stream: &str,
        timestamp_ms: u64,
        direction: Direction,
        metadata: Vec<u8>,
        raw: Vec<u8>,
    ) -> Result<u32> {
        let record = LogRecord {
            timestamp_ms,
            seqnum: 0, // assigned by the writer
            direction,
            metadata,
            raw,
        };
        self.with_writer(stream, |w| w.append(record))
    }

    /// Force unwritten regions of `stream` to durable storage.
    pub fn sync(&self, stream: &str) -> Result<()> {
        self.with_writer(stream, |w| w.sync())
    }

    /// Force all open streams to durable storage.
    pub fn sync_all(&self) -> Result<()> {
        let writers = self.writers.read();
        for w in writers.values() {
            w.lock().unwrap_or_else(|e| e.into_inner()).sync()?;
        }
        Ok(())
    }

    /// Walk every persisted entry of `stream` in write order, optionally
    /// bounded by `[from_seq, to_seq]` (0 on either side means unbounded) and
    /// by `direction_filter`. `callback` returning `false` stops the walk.
    pub fn replay(
        &self,
        stream: &str,
        direction_filter: Option<Direction>,
        from_seq: u32,
        to_seq: u32,
        mut callback: impl FnMut(&LogRecord) -> bool,
    ) -> Result<()> {
        let dir = self.config.root.join(sanitize(stream));
        if !dir.exists() {
            return Ok(());
        }
        let mut segments: Vec<u32> = fs::read_dir(&dir)
            .map_err(|e| Error::Persistence(e.to_string()))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(".seg"))
                    .and_then(|s| s.parse::<u32>().ok())
            })
            .collect();
        segments.sort_unstable();

        for seg in segments {
            let path = segment_path(&dir, seg);
            let file = File::open(&path).map_err(|e| Error::Persistence(e.to_string()))?;
            let mut reader = BufReader::new(file);
            SegmentHeader::read_from(&mut reader).map_err(|e| Error::Persistence(e.to_string()))?;
            while let Some(rec) =
                LogRecord::read_from(&mut reader).map_err(|e| Error::Persistence(e.to_string()))?
            {
                if from_seq != 0 && rec.seqnum < from_seq {
                    continue;
                }
                if to_seq != 0 && rec.seqnum > to_seq {
                    return Ok(());
                }
                if let Some(d) = direction_filter {
                    if rec.direction != d {
                        continue;
                    }
                }
                if !callback(&rec) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Walk entries by stored timestamp range instead of sequence number.
    pub fn replay_by_time(
        &self,
        stream: &str,
        from_ms: u64,
        to_ms: u64,
        mut callback: impl FnMut(&LogRecord) -> bool,
    ) -> Result<()> {
        self.replay(stream, None, 0, 0, |rec| {
            if rec.timestamp_ms < from_ms {
                return true;
            }
            if to_ms != 0 && rec.timestamp_ms > to_ms {
                return false;
            }
            callback(rec)
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }
}
