//! Engine microbenchmark suite.
//!
//! Benchmarks the allocation-sensitive paths of the connection engine:
//! - Buffer pool checkout/restore cycle vs. fresh allocation
//! - Backoff schedule stepping
//! - Outbound frame envelope conversion
//!
//! Run with: cargo bench --bench engine
//! Results saved to: target/criterion/

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use framegate::protocol::Frame;
use framegate::{Backoff, BufferPool};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[256, 4 * 1024, 32 * 1024];

// ============================================================================
// Benchmark: Buffer Pool
// ============================================================================

fn bench_buffer_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0xabu8; size];

        group.bench_with_input(BenchmarkId::new("pooled", size), &payload, |b, payload| {
            let pool = BufferPool::new();
            b.iter(|| {
                let mut buf = pool.checkout();
                buf.extend_from_slice(payload);
                pool.restore(buf);
            });
        });

        group.bench_with_input(BenchmarkId::new("fresh", size), &payload, |b, payload| {
            b.iter(|| {
                let mut buf = Vec::with_capacity(4 * 1024);
                buf.extend_from_slice(payload);
                std::hint::black_box(buf);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Backoff Stepping
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));

    c.bench_function("backoff_walk", |b| {
        b.iter(|| {
            let mut delay = Duration::ZERO;
            for _ in 0..16 {
                delay = backoff.next(delay);
            }
            std::hint::black_box(delay)
        });
    });
}

// ============================================================================
// Benchmark: Frame Conversion
// ============================================================================

fn bench_frame_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_into_message");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0xabu8; size];

        group.bench_with_input(BenchmarkId::new("binary", size), &payload, |b, payload| {
            b.iter(|| {
                let frame = Frame::binary(payload.clone());
                std::hint::black_box(frame.into_message())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_buffer_pool, bench_backoff, bench_frame_conversion);
criterion_main!(benches);
