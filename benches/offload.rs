//! Benchmarks for spindle-rs offload round trips.
//!
//! Run with: cargo bench
//!
//! Each iteration measures submit + worker hand-off + completion dispatch
//! with a zero-length operation, so the numbers are pure bridge overhead:
//! - `block_then_call()`: no thread crossing, descriptor bookkeeping only
//! - `offload_blocking()` on a rayon pool: one cross-thread round trip
//! - `offload_blocking()` thread-per-task: includes an OS thread spawn

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spindle_rs::{SpindleBuilder, SpindleRuntime};

fn create_runtime(worker_threads: Option<usize>) -> SpindleRuntime {
    let builder = SpindleBuilder::new().prefix("bench");
    let builder = match worker_threads {
        Some(n) => builder.worker_threads(n),
        None => builder,
    };
    builder.build().expect("failed to create runtime")
}

/// Synchronous variant: the degenerate bridge with zero worker threads.
fn bench_block_then_call(c: &mut Criterion) {
    let runtime = create_runtime(None);
    let hits = Rc::new(Cell::new(0u64));

    c.bench_function("block_then_call/zero_ms", |b| {
        b.iter(|| {
            let h = hits.clone();
            runtime
                .block_then_call(0, move || h.set(black_box(h.get() + 1)))
                .unwrap();
        });
    });
}

/// One offload at a time, waited to idle.
fn bench_single_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    for (name, threads) in [("pooled", Some(2)), ("thread_per_task", None)] {
        let runtime = create_runtime(threads);
        group.bench_function(name, |b| {
            b.iter(|| {
                runtime.offload_blocking(0, || {}).unwrap();
                runtime.run_until_idle();
            });
        });
    }

    group.finish();
}

/// Many outstanding offloads, dispatched as they arrive.
fn bench_batch_dispatch(c: &mut Criterion) {
    let runtime = create_runtime(Some(4));
    let mut group = c.benchmark_group("batch_dispatch");

    for count in [16usize, 128, 1024] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let hits = Rc::new(Cell::new(0usize));
            b.iter(|| {
                for _ in 0..count {
                    let h = hits.clone();
                    runtime
                        .offload_blocking(0, move || h.set(h.get() + 1))
                        .unwrap();
                }
                runtime.run_until_idle();
            });
            black_box(hits.get());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_block_then_call,
    bench_single_round_trip,
    bench_batch_dispatch
);
criterion_main!(benches);
