// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound sequence number generation.
//!
//! One per session direction: assigns `MsgSeqNum` (FIX) or the sequenced
//! message counter (SoupBinTCP), atomically, so concurrent producer threads
//! claiming ring-buffer slots for the same session never hand out the same
//! number twice.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence number generator. Starts at 1, per FIX/SoupBinTCP
/// convention (sequence numbers never start at 0).
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicU64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next sequence number, incrementing atomically. Returns the value to
    /// use for this message, never repeats, never decreases.
    #[inline]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The sequence number that the next call to `next()` will return,
    /// without consuming it.
    #[inline]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}
