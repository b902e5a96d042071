// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many-producer, single-consumer ring buffer of length-prefixed frames.
//!
//! Generalizes the single-producer/single-consumer committed-flag ring used
//! elsewhere in this codebase to multiple concurrent producers: instead of a
//! single head cursor only one thread ever advances, producers race a
//! compare-and-swap on a monotonic claim cursor. Each claimed region gets its
//! own header with a per-record state (`CLAIMED` -> `COMMITTED`/`ABORTED`),
//! so the single consumer can stop at the first not-yet-committed record
//! without ever observing a torn write. Claims that would straddle the end
//! of the backing buffer are padded: the tail is marked as a skip record and
//! the real claim restarts at offset 0.
//!
//! This is the same trailer-plus-cursors shape as a Disruptor/Aeron
//! many-to-one ring buffer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{Error, Result};

const HEADER_LEN: usize = 8; // u32 length + u32 state
const ALIGNMENT: usize = 8;

const STATE_CLAIMED: u32 = 0;
const STATE_COMMITTED: u32 = 1;
const STATE_ABORTED: u32 = 2;
const STATE_PADDING: u32 = 3;

#[inline]
fn align_up(n: usize) -> usize {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// An opaque handle to a claimed (not yet committed) region of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    offset: usize,
    payload_len: usize,
}

impl Claim {
    pub fn len(&self) -> usize {
        self.payload_len
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }
}

/// What a `controlled_read` handler wants the consumer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    Continue,
    Break,
}

/// Lock-free many-producer/single-consumer ring buffer.
///
/// # Safety model
/// - Multiple threads may call [`Ring::try_claim`], [`Ring::commit`], and
///   [`Ring::abort`] concurrently.
/// - Exactly one thread may call [`Ring::controlled_read`] at a time (the
///   event-loop thread); concurrent consumers would race the read cursor.
pub struct Ring {
    buffer: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    mask: u64,
    /// Monotonic, unwrapped claim cursor. `claim_cursor & mask` is the byte
    /// offset of the next unclaimed byte.
    claim_cursor: AtomicU64,
    /// Monotonic, unwrapped consumer cursor.
    read_cursor: AtomicU64,
}

// SAFETY: all shared mutable access to `buffer` is mediated by disjoint byte
// ranges established via CAS on `claim_cursor`; producers never touch each
// other's ranges, and the consumer only reads ranges already released by a
// committed producer (Acquire/Release pair on the per-record state word).
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create a ring with at least `capacity` bytes of payload room (rounded
    /// up to the next power of two, as required by the masking scheme).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        let capacity = capacity.next_power_of_two();
        Self {
            buffer: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
            mask: (capacity - 1) as u64,
            claim_cursor: AtomicU64::new(0),
            read_cursor: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of payload bytes currently claimed-or-committed
    /// but not yet consumed. Racy under concurrent producers; intended for
    /// metrics/backpressure signalling, not correctness.
    pub fn len(&self) -> usize {
        let claim = self.claim_cursor.load(Ordering::Relaxed);
        let read = self.read_cursor.load(Ordering::Relaxed);
        (claim - read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve `payload_len` bytes. Returns [`Error::RingFull`] when there is
    /// not enough room ahead of the consumer cursor; returns
    /// [`Error::RingPayloadTooLarge`] when `payload_len` alone could never
    /// fit regardless of occupancy.
    pub fn try_claim(&self, payload_len: usize) -> Result<Claim> {
        let needed = align_up(HEADER_LEN + payload_len);
        if needed > self.capacity {
            return Err(Error::RingPayloadTooLarge {
                requested: payload_len,
                capacity: self.capacity,
            });
        }

        loop {
            let current = self.claim_cursor.load(Ordering::Acquire);
            let read = self.read_cursor.load(Ordering::Acquire);
            let used = (current - read) as usize;
            let offset_in_buffer = (current & self.mask) as usize;
            let to_end = self.capacity - offset_in_buffer;

            let (advance, claim_offset) = if to_end < needed {
                // Claim would straddle the end; pad the tail and wrap.
                (to_end + needed, 0usize)
            } else {
                (needed, offset_in_buffer)
            };

            if used + advance > self.capacity {
                return Err(Error::RingFull);
            }

            let next = current + advance as u64;
            if self
                .claim_cursor
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if to_end < needed {
                    // SAFETY: this thread exclusively owns [offset_in_buffer, offset_in_buffer+to_end)
                    // after winning the CAS above; no other producer can have claimed it.
                    unsafe {
                        self.write_header(offset_in_buffer, (to_end - HEADER_LEN) as u32, STATE_PADDING);
                    }
                }
                return Ok(Claim {
                    offset: claim_offset,
                    payload_len,
                });
            }
            // Lost the race; retry with fresh cursor values.
        }
    }

    /// Mutable access to the payload bytes of a claim, for the producer to
    /// fill in before calling [`Ring::commit`].
    ///
    /// # Safety
    /// Must only be called once per claim, by the thread that owns it, and
    /// the returned slice must not outlive the claim's commit/abort call.
    pub unsafe fn payload_mut(&self, claim: &Claim) -> &mut [u8] {
        let buf = &mut *self.buffer.get();
        let start = claim.offset + HEADER_LEN;
        &mut buf[start..start + claim.payload_len]
    }

    /// Copy `bytes` into the claim's payload region. Convenience wrapper
    /// around [`Ring::payload_mut`] for the common case.
    pub fn write_claim(&self, claim: &Claim, bytes: &[u8]) {
        assert_eq!(bytes.len(), claim.payload_len);
        // SAFETY: claim is exclusively owned by the caller until commit/abort.
        let dest = unsafe { self.payload_mut(claim) };
        dest.copy_from_slice(bytes);
    }

    /// Publish a claimed region so the consumer may read it. Frames become
    /// visible to the consumer strictly in claim order.
    pub fn commit(&self, claim: Claim) {
        // SAFETY: this thread owns the claim's header slot exclusively.
        unsafe {
            self.write_header(claim.offset, claim.payload_len as u32, STATE_COMMITTED);
        }
    }

    /// Mark a claimed region as a skip record; the consumer advances past it
    /// without invoking the read handler.
    pub fn abort(&self, claim: Claim) {
        // SAFETY: this thread owns the claim's header slot exclusively.
        unsafe {
            self.write_header(claim.offset, claim.payload_len as u32, STATE_ABORTED);
        }
    }

    unsafe fn write_header(&self, offset: usize, len: u32, state: u32) {
        let buf = &mut *self.buffer.get();
        let len_ptr = buf.as_mut_ptr().add(offset).cast::<u32>();
        len_ptr.write_unaligned(len);
        let state_ptr = buf.as_mut_ptr().add(offset + 4).cast::<AtomicU32>();
        (*state_ptr).store(state, Ordering::Release);
    }

    unsafe fn read_header(&self, offset: usize) -> (u32, u32) {
        let buf = &*self.buffer.get();
        let len_ptr = buf.as_ptr().add(offset).cast::<u32>();
        let len = len_ptr.read_unaligned();
        let state_ptr = buf.as_ptr().add(offset + 4).cast::<AtomicU32>();
        let state = (*state_ptr).load(Ordering::Acquire);
        (len, state)
    }

    /// Single-consumer iteration over committed records, starting at the
    /// current read cursor. Stops at the first not-yet-committed record
    /// (never blocks) or when `handler` returns [`ReadAction::Break`].
    /// Returns the number of application records delivered (padding/abort
    /// skip records are not counted).
    pub fn controlled_read<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&[u8]) -> ReadAction,
    {
        let mut delivered = 0;
        loop {
            let read = self.read_cursor.load(Ordering::Relaxed);
            let claimed = self.claim_cursor.load(Ordering::Acquire);
            if read == claimed {
                break; // nothing claimed yet
            }
            let offset = (read & self.mask) as usize;
            // SAFETY: single-consumer discipline; offset was claimed by some
            // producer and only read after Acquire-observing its state.
            let (len, state) = unsafe { self.read_header(offset) };
            if state == STATE_CLAIMED {
                break; // producer hasn't committed/aborted yet; don't spin
            }

            let advance = align_up(HEADER_LEN + len as usize) as u64;
            let action = if state == STATE_COMMITTED {
                // SAFETY: state == COMMITTED happened-after the producer's
                // payload write (Release on commit, Acquire on read above).
                let payload = unsafe {
                    let buf = &*self.buffer.get();
                    &buf[offset + HEADER_LEN..offset + HEADER_LEN + len as usize]
                };
                delivered += 1;
                handler(payload)
            } else {
                ReadAction::Continue
            };

            self.read_cursor.store(read + advance, Ordering::Release);

            if action == ReadAction::Break {
                break;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn claim_and_commit(ring: &Ring, payload: &[u8]) {
        let claim = ring.try_claim(payload.len()).expect("claim");
        ring.write_claim(&claim, payload);
        ring.commit(claim);
    }

    #[test]
    fn single_producer_round_trip() {
        let ring = Ring::with_capacity(256);
        claim_and_commit(&ring, b"hello");
        let mut seen = Vec::new();
        ring.controlled_read(|payload| {
            seen.push(payload.to_vec());
            ReadAction::Continue
        });
        assert_eq!(seen, vec![b"hello".to_vec()]);
    }

    #[test]
    fn claim_order_is_preserved_on_drain() {
        let ring = Ring::with_capacity(1024);
        for i in 0..10u8 {
            claim_and_commit(&ring, &[i; 4]);
        }
        let mut order = Vec::new();
        ring.controlled_read(|payload| {
            order.push(payload[0]);
            ReadAction::Continue
        });
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn abort_is_skipped_by_consumer() {
        let ring = Ring::with_capacity(256);
        let claim = ring.try_claim(4).unwrap();
        ring.write_claim(&claim, &[9, 9, 9, 9]);
        ring.abort(claim);
        claim_and_commit(&ring, b"next");

        let mut seen = Vec::new();
        ring.controlled_read(|p| {
            seen.push(p.to_vec());
            ReadAction::Continue
        });
        assert_eq!(seen, vec![b"next".to_vec()]);
    }

    #[test]
    fn uncommitted_claim_halts_the_consumer() {
        let ring = Ring::with_capacity(256);
        let claim = ring.try_claim(4).unwrap();
        ring.write_claim(&claim, &[1, 2, 3, 4]);
        // Not committed yet.
        let mut seen = 0;
        ring.controlled_read(|_| {
            seen += 1;
            ReadAction::Continue
        });
        assert_eq!(seen, 0);

        ring.commit(claim);
        ring.controlled_read(|_| {
            seen += 1;
            ReadAction::Continue
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn full_ring_rejects_without_side_effects() {
        // Capacity 64 rounds to 64; header+payload aligned to 8 bytes each.
        let ring = Ring::with_capacity(64);
        let mut claims = Vec::new();
        loop {
            match ring.try_claim(8) {
                Ok(c) => claims.push(c),
                Err(Error::RingFull) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(!claims.is_empty());
        assert!(matches!(ring.try_claim(8), Err(Error::RingFull)));

        for c in claims {
            ring.write_claim(&c, &[0u8; 8]);
            ring.commit(c);
        }
        let mut drained = 0;
        ring.controlled_read(|_| {
            drained += 1;
            ReadAction::Continue
        });
        assert!(drained > 0);
        // After a full drain, claiming should succeed again.
        assert!(ring.try_claim(8).is_ok());
    }

    #[test]
    fn payload_larger_than_capacity_is_rejected() {
        let ring = Ring::with_capacity(64);
        assert!(matches!(
            ring.try_claim(1024),
            Err(Error::RingPayloadTooLarge { .. })
        ));
    }

    #[test]
    fn concurrent_producers_preserve_total_order_per_producer_and_no_torn_reads() {
        let ring = Arc::new(Ring::with_capacity(1 << 16));
        let producers = 8u8;
        let per_producer = 500u32;

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    let payload = [p, (i >> 8) as u8, i as u8, 0xAA];
                    loop {
                        if let Ok(claim) = ring.try_claim(payload.len()) {
                            ring.write_claim(&claim, &payload);
                            ring.commit(claim);
                            break;
                        }
                        // Backpressure: drain is racing on the main thread; spin.
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut last_seen = [None; 8];
        let mut total = 0u32;
        let target = producers as u32 * per_producer;
        while total < target {
            total += ring.controlled_read(|payload| {
                assert_eq!(payload.len(), 4);
                assert_eq!(payload[3], 0xAA, "torn or corrupted record observed");
                let p = payload[0] as usize;
                let seq = ((payload[1] as u32) << 8) | payload[2] as u32;
                if let Some(prev) = last_seen[p] {
                    assert!(seq > prev, "producer {p} out of order: {prev} -> {seq}");
                }
                last_seen[p] = Some(seq);
                ReadAction::Continue
            }) as u32;
            thread::yield_now();
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
