// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk record format for a persisted stream.
//!
//! Each stream is a sequence of segment files. Every segment starts with a
//! fixed [`SegmentHeader`] and is then a back-to-back sequence of
//! [`LogRecord`]s:
//!
//! ```text
//! [u32 total_length][u64 timestamp_ms][u32 seqnum][u8 direction]
//! [u16 metadata_len][metadata bytes][u32 raw_len][raw bytes][u32 crc32]
//! ```
//!
//! `total_length` covers everything after itself, including the trailing
//! CRC, so a reader can skip a record it doesn't want to fully parse.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

/// Magic bytes identifying a segment file.
pub const MAGIC: &[u8; 8] = b"XCONNLOG";
pub const FORMAT_VERSION: u32 = 1;

/// Direction a persisted message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound = 0,
    Outbound = 1,
}

impl Direction {
    fn from_u8(b: u8) -> io::Result<Self> {
        match b {
            0 => Ok(Direction::Inbound),
            1 => Ok(Direction::Outbound),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid direction byte {other}"),
            )),
        }
    }
}

/// Fixed 32-byte segment header.
#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    pub version: u32,
    /// Sequence number of the first record in this segment, for fast
    /// file-to-range indexing.
    pub first_seqnum: u32,
}

impl SegmentHeader {
    pub const ENCODED_LEN: usize = 8 + 4 + 4 + 16; // magic + version + first_seqnum + reserved

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.first_seqnum)?;
        w.write_all(&[0u8; 16])?; // reserved for future use
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad segment magic"));
        }
        let version = r.read_u32::<LittleEndian>()?;
        let first_seqnum = r.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; 16];
        r.read_exact(&mut reserved)?;
        Ok(Self {
            version,
            first_seqnum,
        })
    }
}

/// A single persisted log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub seqnum: u32,
    pub direction: Direction,
    pub metadata: Vec<u8>,
    pub raw: Vec<u8>,
}

impl LogRecord {
    fn body_len(&self) -> usize {
        8 + 4 + 1 + 2 + self.metadata.len() + 4 + self.raw.len()
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.body_len() + 4 // total_length field + body + crc32
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let total_length = (self.body_len() + 4) as u32; // + crc32 trailer
        let mut body = Vec::with_capacity(self.body_len());
        body.write_u64::<LittleEndian>(self.timestamp_ms)?;
        body.write_u32::<LittleEndian>(self.seqnum)?;
        body.write_u8(self.direction as u8)?;
        body.write_u16::<LittleEndian>(self.metadata.len() as u16)?;
        body.write_all(&self.metadata)?;
        body.write_u32::<LittleEndian>(self.raw.len() as u32)?;
        body.write_all(&self.raw)?;

        let mut hasher = Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        w.write_u32::<LittleEndian>(total_length)?;
        w.write_all(&body)?;
        w.write_u32::<LittleEndian>(crc)?;
        Ok(())
    }

    /// Read one record. Returns `Ok(None)` at a clean EOF (no bytes read).
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        let total_length = match r.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut body = vec![0u8; total_length as usize];
        r.read_exact(&mut body)?;

        if body.len() < 4 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "record truncated"));
        }
        let (payload, crc_bytes) = body.split_at(body.len() - 4);
        let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "record CRC mismatch"));
        }

        let mut cursor = io::Cursor::new(payload);
        let timestamp_ms = cursor.read_u64::<LittleEndian>()?;
        let seqnum = cursor.read_u32::<LittleEndian>()?;
        let direction = Direction::from_u8(cursor.read_u8()?)?;
        let meta_len = cursor.read_u16::<LittleEndian>()? as usize;
        let mut metadata = vec![0u8; meta_len];
        cursor.read_exact(&mut metadata)?;
        let raw_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut raw = vec![0u8; raw_len];
        cursor.read_exact(&mut raw)?;

        Ok(Some(LogRecord {
            timestamp_ms,
            seqnum,
            direction,
            metadata,
            raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let rec = LogRecord {
            timestamp_ms: 1_700_000_000_000,
            seqnum: 42,
            direction: Direction::Outbound,
            metadata: b"meta".to_vec(),
            raw: b"8=FIX.4.2|...".to_vec(),
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), rec.encoded_len());

        let mut cursor = io::Cursor::new(buf);
        let decoded = LogRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn corrupted_record_fails_crc_check() {
        let rec = LogRecord {
            timestamp_ms: 1,
            seqnum: 1,
            direction: Direction::Inbound,
            metadata: Vec::new(),
            raw: b"hello".to_vec(),
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut cursor = io::Cursor::new(buf);
        assert!(LogRecord::read_from(&mut cursor).is_err());
    }

    #[test]
    fn read_from_empty_reader_is_clean_eof() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        assert!(LogRecord::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn segment_header_round_trips() {
        let header = SegmentHeader {
            version: FORMAT_VERSION,
            first_seqnum: 7,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), SegmentHeader::ENCODED_LEN);

        let mut cursor = io::Cursor::new(buf);
        let decoded = SegmentHeader::read_from(&mut cursor).unwrap();
        assert_eq!(decoded.version, FORMAT_VERSION);
        assert_eq!(decoded.first_seqnum, 7);
    }
}
