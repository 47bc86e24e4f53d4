//! Benchmarks for the data-frame hot path
//!
//! Every streamed frame is decoded by the reader, pushed into the smoothing window and,
//! for each consumer reply, averaged and encoded again:
//! - `encode_frame` / `decode_frame` on an eight-coil 6-DOF frame
//! - `SmoothingWindow::average` over typical window lengths
//!
//! Platform: Cross-platform (synthetic frames, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use emarelay::protocol::{decode_frame, encode_frame};
use emarelay::test_utils::calibration_frame;
use emarelay::types::SmoothingWindow;
use nalgebra::Vector3;
use std::hint::black_box;
use std::sync::Arc;

fn bench_frame_codec(c: &mut Criterion) {
    let frame = calibration_frame(1_000_000, Vector3::new(1.5, -2.0, 0.25));
    let body = encode_frame(&frame).expect("encode");

    let mut group = c.benchmark_group("frame_codec");
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("encode_frame", |b| b.iter(|| black_box(encode_frame(black_box(&frame)))));
    group.bench_function("decode_frame", |b| {
        b.iter(|| black_box(decode_frame(black_box(&body[..])).expect("decode")))
    });

    group.finish();
}

fn bench_window_average(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoothing_window_average");

    for len in [1usize, 5, 20, 100] {
        let mut window = SmoothingWindow::new(len);
        for i in 0..len {
            let offset = Vector3::new(i as f32 * 0.1, 0.0, 0.0);
            window.push(Arc::new(calibration_frame(i as u64 * 2_500, offset)));
        }

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &window, |b, window| {
            b.iter(|| black_box(window.average()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_codec, bench_window_average);
criterion_main!(benches);
