//! Producer-side cost of the signal queue.
//!
//! Run with: cargo bench -p telemetry_pipeline --bench queue

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use telemetry_pipeline::{LogRecord, Severity, SignalQueue, TelemetryItem};

const ITEMS: u64 = 100_000;
const BATCH: usize = 512;

fn log_item(i: u64) -> TelemetryItem {
    LogRecord::new(Severity::Info, format!("line {}", i)).into()
}

/// Enqueue and drain on one thread, draining a batch whenever the queue fills
fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");
    group.throughput(Throughput::Elements(ITEMS));

    group.bench_function("enqueue_drain", |b| {
        let queue = SignalQueue::with_batch_threshold(2048, BATCH);
        b.iter(|| {
            let mut drained = 0usize;
            for i in 0..ITEMS {
                if queue.enqueue(log_item(i)).is_err() {
                    drained += queue.drain(BATCH).len();
                }
            }
            drained += queue.drain(usize::MAX).len();
            black_box(drained)
        });
    });

    group.bench_function("overflow_reject", |b| {
        let queue = SignalQueue::new(1);
        queue.enqueue(0u64).ok();
        b.iter(|| {
            for i in 0..ITEMS {
                black_box(queue.enqueue(black_box(i)).is_err());
            }
        });
    });

    group.finish();
}

/// Several producer threads against one draining consumer
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");

    for producers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(ITEMS));
        group.bench_function(format!("{}_producers", producers), |b| {
            b.iter(|| {
                let queue = Arc::new(SignalQueue::with_batch_threshold(2048, BATCH));
                let per_producer = ITEMS / producers as u64;

                let handles: Vec<_> = (0..producers)
                    .map(|_| {
                        let queue = Arc::clone(&queue);
                        thread::spawn(move || {
                            for i in 0..per_producer {
                                let _ = queue.enqueue(black_box(i));
                            }
                        })
                    })
                    .collect();

                let mut drained = 0usize;
                while handles.iter().any(|h| !h.is_finished()) {
                    drained += queue.drain(BATCH).len();
                }
                for handle in handles {
                    handle.join().unwrap();
                }
                drained += queue.drain(usize::MAX).len();
                black_box(drained + queue.dropped_count() as usize)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
