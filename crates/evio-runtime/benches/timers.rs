use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::{Duration, Instant};

use evio_runtime::timer::TimerQueue;

fn bench_timer_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue");

    for &n in &[100usize, 1_000, 10_000] {
        group.bench_function(BenchmarkId::new("insert_then_drain", n), |b| {
            b.iter(|| {
                let mut q = TimerQueue::with_capacity(n);
                let base = Instant::now();
                // Scatter the deadlines so heap order differs from
                // insertion order.
                for i in 0..n {
                    q.insert(base + Duration::from_nanos(((i * 37) % 1000) as u64));
                }
                black_box(q.poll_expired(base + Duration::from_micros(2)))
            });
        });

        group.bench_function(BenchmarkId::new("insert_cancel_half", n), |b| {
            b.iter(|| {
                let mut q = TimerQueue::with_capacity(n);
                let base = Instant::now();
                let mut ids = Vec::with_capacity(n);
                for i in 0..n {
                    ids.push(q.insert(base + Duration::from_nanos(((i * 37) % 1000) as u64)));
                }
                for id in ids.iter().step_by(2) {
                    q.cancel(*id);
                }
                black_box(q.poll_expired(base + Duration::from_micros(2)))
            });
        });
    }

    group.bench_function("next_deadline_scrub", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let mut q = TimerQueue::with_capacity(1024);
                let base = Instant::now();
                let ids: Vec<_> = (0..1024)
                    .map(|i| q.insert(base + Duration::from_nanos(i as u64)))
                    .collect();
                // Cancel the whole front so the scrub does real work.
                for id in &ids[..512] {
                    q.cancel(*id);
                }
                let start = Instant::now();
                black_box(q.next_deadline());
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(20);
    targets = bench_timer_queue
}
criterion_main!(benches);
