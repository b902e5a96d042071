// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Encode/decode throughput for the FIX tag/value codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use xconn::protocol::fix::{scan_identity, FixDecoder, FixMessageBuilder};

fn new_order_single(seq_num: u64) -> Vec<u8> {
    FixMessageBuilder::new("FIX.4.2", "D")
        .field(49, "CLIENT1")
        .field(56, "ARCA")
        .field(34, seq_num.to_string())
        .field(11, format!("ORD{seq_num}"))
        .field(55, "AAPL")
        .field(54, "1")
        .field(38, "100")
        .field(40, "2")
        .field(44, "150.25")
        .build()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fix_encode");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("new_order_single_x1000", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                let bytes = new_order_single(black_box(i));
                black_box(bytes);
            }
        })
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let messages: Vec<Vec<u8>> = (0..1000u64).map(new_order_single).collect();

    let mut group = c.benchmark_group("fix_decode");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("new_order_single_x1000", |b| {
        b.iter(|| {
            let mut decoder = FixDecoder::new(4096);
            for msg in &messages {
                decoder.feed(black_box(msg));
                while let Some(parsed) = decoder.try_parse().unwrap() {
                    black_box(parsed);
                }
            }
        })
    });
    group.finish();
}

fn bench_scan_identity(c: &mut Criterion) {
    let msg = new_order_single(1);

    c.bench_function("fix_scan_identity", |b| {
        b.iter(|| {
            let ids = scan_identity(black_box(&msg));
            black_box(ids);
        })
    });
}

criterion_group!(fix_benches, bench_encode, bench_decode, bench_scan_identity);
criterion_main!(fix_benches);
