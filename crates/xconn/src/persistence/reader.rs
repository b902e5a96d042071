// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tailing reader over a single persisted stream.
//!
//! Unlike [`Store::replay`](super::store::Store::replay), which walks a fixed
//! range once, a `Reader` holds a cursor and can be polled repeatedly,
//! returning newly-appended records as they land. Position is an opaque
//! sequence-number cursor so callers can persist and restore it across
//! restarts.

use std::thread;
use std::time::{Duration, Instant};

use super::format::LogRecord;
use super::store::Store;
use crate::error::Result;

/// Where a freshly-opened reader should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Start,
    End,
    /// Resume from a previously-saved cursor (next seqnum to deliver).
    At(u32),
}

/// Poll backoff between empty reads while waiting out a timeout.
const POLL_BACKOFF: Duration = Duration::from_millis(2);

pub struct Reader<'s> {
    store: &'s Store,
    stream: String,
    /// Next sequence number this reader has not yet delivered.
    next_seq: u32,
    closed: bool,
}

impl<'s> Reader<'s> {
    pub fn open(store: &'s Store, stream: &str, start: StartPosition) -> Result<Self> {
        let next_seq = match start {
            StartPosition::Start => 1,
            StartPosition::At(seq) => seq,
            StartPosition::End => {
                let mut last = 0u32;
                store.replay(stream, None, 0, 0, |rec| {
                    last = rec.seqnum;
                    true
                })?;
                last + 1
            }
        };
        Ok(Self {
            store,
            stream: stream.to_string(),
            next_seq,
            closed: false,
        })
    }

    /// Opaque cursor identifying the next record this reader will deliver.
    pub fn position(&self) -> u32 {
        self.next_seq
    }

    pub fn set_position(&mut self, position: u32) {
        self.next_seq = position;
    }

    /// True if at least one record is currently available without waiting.
    pub fn has_next(&self) -> Result<bool> {
        Ok(self.available()? > 0)
    }

    /// Count of currently-persisted records at or after the cursor.
    pub fn available(&self) -> Result<usize> {
        let mut count = 0usize;
        self.store.replay(&self.stream, None, self.next_seq, 0, |_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// Return the next record if one is immediately available, without
    /// waiting.
    pub fn try_poll(&mut self) -> Result<Option<LogRecord>> {
        let mut found = None;
        self.store.replay(&self.stream, None, self.next_seq, self.next_seq, |rec| {
            found = Some(rec.clone());
            false
        })?;
        if let Some(rec) = &found {
            self.next_seq = rec.seqnum + 1;
        }
        Ok(found)
    }

    /// Return the next record, waiting up to `timeout` for it to appear.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(rec) = self.try_poll()? {
                return Ok(Some(rec));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_BACKOFF.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Deliver up to `batch_size` records to `callback`, waiting up to
    /// `timeout` for the first one. Returns the number delivered.
    pub fn poll_batch(
        &mut self,
        batch_size: usize,
        timeout: Duration,
        mut callback: impl FnMut(&LogRecord),
    ) -> Result<usize> {
        let mut delivered = 0;
        if batch_size == 0 {
            return Ok(0);
        }
        if let Some(first) = self.poll(timeout)? {
            callback(&first);
            delivered += 1;
        } else {
            return Ok(0);
        }
        while delivered < batch_size {
            match self.try_poll()? {
                Some(rec) => {
                    callback(&rec);
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    /// Deliver every currently-available record (or up to `max` if nonzero)
    /// without waiting for more to arrive.
    pub fn drain(&mut self, max: usize, mut callback: impl FnMut(&LogRecord)) -> Result<usize> {
        let mut delivered = 0;
        loop {
            if max != 0 && delivered >= max {
                break;
            }
            match self.try_poll()? {
                Some(rec) => {
                    callback(&rec);
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
