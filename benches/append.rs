use criterion::{black_box, BatchSize, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use diskqueue::DiskQueue;

const OPS_PER_ITER: usize = 1_000;

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push");
    for &size in &[64_usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let queue = DiskQueue::open(dir.path().join("bench_queue")).expect("open");
                    let payload = vec![0xA5u8; size];
                    (dir, queue, payload)
                },
                |(_dir, queue, payload)| {
                    for _ in 0..OPS_PER_ITER {
                        queue.push(black_box(&payload)).expect("push");
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");
    group.bench_function("256", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().expect("tempdir");
                let queue = DiskQueue::open(dir.path().join("bench_queue")).expect("open");
                let payload = vec![0xA5u8; 256];
                (dir, queue, payload)
            },
            |(_dir, queue, payload)| {
                for _ in 0..OPS_PER_ITER {
                    queue.push(black_box(&payload)).expect("push");
                    queue.pop().expect("pop").expect("record");
                }
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_push, bench_push_pop);
criterion_main!(benches);
