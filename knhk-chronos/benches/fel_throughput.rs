//! Future Event List enqueue/dequeue throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knhk_chronos::event::{EventKind, FutureEventList, Priority, ScheduledEvent};
use knhk_chronos::{EventId, SimTime};

fn event(id: u64, when: f64) -> ScheduledEvent {
    ScheduledEvent {
        id: EventId(id),
        when: SimTime::new(when),
        priority: Priority::DEFAULT,
        kind: EventKind::Synchronous,
        callback: Box::new(|| {}),
    }
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("fel_insert");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("ascending", size), &size, |b, &size| {
            b.iter(|| {
                let mut fel = FutureEventList::new();
                for i in 0..size {
                    fel.insert(event(i, i as f64));
                }
                black_box(fel.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("random", size), &size, |b, &size| {
            let times: Vec<f64> = (0..size).map(|i| ((i * 2654435761u64) % (size * 4)) as f64).collect();
            b.iter(|| {
                let mut fel = FutureEventList::new();
                for (i, t) in times.iter().enumerate() {
                    fel.insert(event(i as u64, *t));
                }
                black_box(fel.len())
            });
        });
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fel_drain");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("pop_all", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut fel = FutureEventList::new();
                    for i in 0..size {
                        fel.insert(event(i, (size - i) as f64));
                    }
                    fel
                },
                |mut fel| {
                    while let Some(ev) = fel.pop() {
                        black_box(ev.id);
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("fel_cancel");

    group.bench_function("cancel_half_then_drain", |b| {
        b.iter_batched(
            || {
                let mut fel = FutureEventList::new();
                for i in 0..2_000 {
                    fel.insert(event(i, i as f64));
                }
                fel
            },
            |mut fel| {
                for i in (0..2_000).step_by(2) {
                    fel.cancel(EventId(i));
                }
                while let Some(ev) = fel.pop() {
                    black_box(ev.id);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(fel_benches, bench_insert, bench_drain, bench_cancel);
criterion_main!(fel_benches);
