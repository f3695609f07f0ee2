//! Benchmark for the lock-free MPMC task queue.
//!
//! Run with: cargo bench --package remora-core --bench mpmc_queue_benchmark

use std::sync::Arc;
use std::thread;

use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use remora_core::mpmc_queue::MpmcQueue;

fn producers_consumers(producer_count: usize, values_per_producer: usize) {
    let queue: Arc<MpmcQueue<usize>> = Arc::new(MpmcQueue::new());

    let handles: Vec<_> = (0..producer_count)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for sequence in 0..values_per_producer {
                    queue.push(producer * values_per_producer + sequence);
                }
            })
        })
        .collect();

    let mut popped = 0;
    while popped < producer_count * values_per_producer {
        if let Some(value) = queue.pop() {
            black_box(value);
            popped += 1;
        } else {
            thread::yield_now();
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

fn benchmark_mpmc_queue(criterion: &mut Criterion) {
    criterion.bench_function("single_producer_drain", |bencher| {
        bencher.iter(|| {
            let queue = MpmcQueue::new();
            for i in 0..10_000 {
                queue.push(i);
            }
            while let Some(value) = queue.pop() {
                black_box(value);
            }
        })
    });

    criterion.bench_function("four_producers_one_consumer", |bencher| {
        bencher.iter(|| producers_consumers(4, 5_000))
    });
}

criterion_group!(benches, benchmark_mpmc_queue);
criterion_main!(benches);
