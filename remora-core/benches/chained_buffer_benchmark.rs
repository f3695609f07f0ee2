//! Benchmark for the chained buffer's copy and zero-copy paths.
//!
//! Run with: cargo bench --package remora-core --bench chained_buffer_benchmark

use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use remora_core::buffer::{BLOCK_SIZE, ChainedBuffer};

fn write_read_cycle(payload: &[u8], rounds: usize) {
    let mut buffer = ChainedBuffer::new();
    let mut out = vec![0u8; payload.len()];

    for _ in 0..rounds {
        buffer.write(payload);
        buffer.read(&mut out);
    }
    black_box(out);
}

fn zero_copy_cycle(payload: &[u8], rounds: usize) {
    let mut buffer = ChainedBuffer::new();

    for _ in 0..rounds {
        buffer.write(payload);
        let mut drained = 0;
        while drained < payload.len() {
            let span = buffer.input_next().unwrap();
            drained += black_box(span).len();
        }
    }
}

fn benchmark_chained_buffer(criterion: &mut Criterion) {
    let small = vec![0x5Au8; 256];
    let large = vec![0x5Au8; 4 * BLOCK_SIZE];

    criterion.bench_function("write_read_small", |bencher| {
        bencher.iter(|| write_read_cycle(&small, 100))
    });

    criterion.bench_function("write_read_multi_block", |bencher| {
        bencher.iter(|| write_read_cycle(&large, 100))
    });

    criterion.bench_function("zero_copy_multi_block", |bencher| {
        bencher.iter(|| zero_copy_cycle(&large, 100))
    });
}

criterion_group!(benches, benchmark_chained_buffer);
criterion_main!(benches);
