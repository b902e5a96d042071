// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A ring at capacity rejects further claims with `Error::RingFull` rather
//! than blocking; draining frees room for subsequent claims to succeed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use xconn::error::Error;
use xconn::ring::{ReadAction, Ring};

#[test]
fn full_ring_rejects_claims_until_drained() {
    // Each 120-byte payload needs align_up(8 + 120) = 128 bytes of ring
    // space, so a 4096-byte ring holds exactly 32 committed frames.
    let ring = Ring::with_capacity(4096);
    let payload = vec![0x42u8; 120];

    for _ in 0..32 {
        let claim = ring.try_claim(payload.len()).expect("ring should have room for 32 frames");
        ring.write_claim(&claim, &payload);
        ring.commit(claim);
    }

    match ring.try_claim(payload.len()) {
        Err(Error::RingFull) => {}
        other => panic!("33rd claim should be rejected as RingFull, got {other:?}"),
    }

    let mut drained = 0usize;
    ring.controlled_read(|frame| {
        assert_eq!(frame, payload.as_slice());
        drained += 1;
        ReadAction::Continue
    });
    assert_eq!(drained, 32);

    let claim = ring.try_claim(payload.len()).expect("claim should succeed again once drained");
    ring.write_claim(&claim, &payload);
    ring.commit(claim);
}

#[test]
fn payload_larger_than_capacity_is_rejected_up_front() {
    let ring = Ring::with_capacity(256);
    match ring.try_claim(1024) {
        Err(Error::RingPayloadTooLarge { requested, capacity }) => {
            assert_eq!(requested, 1024);
            assert_eq!(capacity, 256);
        }
        other => panic!("oversized claim should be rejected immediately, got {other:?}"),
    }
}

#[test]
fn concurrent_producers_never_exceed_capacity_or_corrupt_frames() {
    let ring = Arc::new(Ring::with_capacity(1 << 16));
    let producer_count = 8;
    let frames_per_producer = 200;
    let committed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..producer_count)
        .map(|id| {
            let ring = Arc::clone(&ring);
            let committed = Arc::clone(&committed);
            let rejected = Arc::clone(&rejected);
            thread::spawn(move || {
                let payload = vec![id as u8; 32];
                for _ in 0..frames_per_producer {
                    match ring.try_claim(payload.len()) {
                        Ok(claim) => {
                            ring.write_claim(&claim, &payload);
                            ring.commit(claim);
                            committed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(Error::RingFull) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected error: {e:?}"),
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut seen = 0usize;
    ring.controlled_read(|frame| {
        assert_eq!(frame.len(), 32);
        seen += 1;
        ReadAction::Continue
    });

    assert_eq!(seen, committed.load(Ordering::Relaxed), "every committed frame must be observed exactly once");
}
