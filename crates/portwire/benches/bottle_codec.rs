// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bottle Codec Benchmark
//!
//! Measures the binary and text codecs on:
//! - Homogeneous int32 lists (specialized encoding)
//! - Mixed command bottles with nesting
//!
//! No connection or stream is involved.

#![allow(clippy::cast_possible_truncation)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use portwire::{Bottle, Value};
use std::hint::black_box as bb;

fn int_list(len: usize) -> Bottle {
    let mut bottle = Bottle::new();
    for i in 0..len {
        bottle.add_int32(i as i32);
    }
    bottle
}

fn command(width: usize) -> Bottle {
    let mut bottle = Bottle::new();
    bottle.add_string("set").add_string("pose");
    for i in 0..width {
        let mut joint = Bottle::new();
        joint
            .add_string("joint")
            .add_int32(i as i32)
            .add_float64(0.25 * i as f64);
        bottle.add(Value::List(joint));
    }
    bottle
}

/// Encode and decode homogeneous lists of increasing length
fn bench_binary_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("bottle_binary_by_size");

    for len in [8, 64, 512, 4096] {
        let bottle = int_list(len);
        let wire = bottle.encode();
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", len), &bottle, |b, bottle| {
            b.iter(|| bb(bottle.encode()));
        });
        group.bench_with_input(BenchmarkId::new("decode", len), &wire, |b, wire| {
            b.iter(|| Bottle::decode(bb(wire)).expect("decode should succeed"));
        });
    }

    group.finish();
}

/// Binary versus text on a nested command bottle
fn bench_binary_vs_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("bottle_binary_vs_text");
    let bottle = command(16);
    let wire = bottle.encode();
    let text = bottle.to_string();

    group.bench_function("binary_encode", |b| b.iter(|| bb(bottle.encode())));
    group.bench_function("binary_decode", |b| {
        b.iter(|| Bottle::decode(bb(&wire)).expect("decode should succeed"));
    });
    group.bench_function("text_print", |b| b.iter(|| bb(bottle.to_string())));
    group.bench_function("text_parse", |b| {
        b.iter(|| Bottle::parse(bb(&text)).expect("parse should succeed"));
    });

    group.finish();
}

criterion_group!(codec_benches, bench_binary_by_size, bench_binary_vs_text);
criterion_main!(codec_benches);
