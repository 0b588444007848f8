//! Benchmarks for the clock queue and the cooperative clock.
//!
//! Benchmarks cover:
//! - Queue push/pop in time order
//! - Ties resolved by insertion order
//! - Draining due entries
//! - AppClock advance over callbacks and tasks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use synth_clock::config::DriveMode;
use synth_clock::infra::queue::memory::InMemoryQueue;
use synth_clock::{AppClock, LogicalClock, Schedulable, Task, Yield};

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic scattered times in `[0, 1000)`.
fn scattered_time(i: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let x = (i.wrapping_mul(2_654_435_761) % 1_000_000) as f64;
    x / 1000.0
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = InMemoryQueue::new(size as usize);
                for i in 0..size {
                    q.push(scattered_time(i), i).unwrap();
                }
                while let Some(entry) = q.pop() {
                    black_box(entry);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_equal_times(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_equal_times");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = InMemoryQueue::new(size as usize);
                for i in 0..size {
                    q.push(1.0, i).unwrap();
                }
                while let Some(entry) = q.pop() {
                    black_box(entry);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_drain_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_drain_due");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = InMemoryQueue::new(size as usize);
                for i in 0..size {
                    q.push(scattered_time(i), i).unwrap();
                }
                black_box(q.drain_due(500.0));
            });
        });
    }
    group.finish();
}

// ============================================================================
// AppClock Benchmarks
// ============================================================================

fn bench_app_clock_callbacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_clock_callbacks");

    for mode in [DriveMode::Recursive, DriveMode::NonRecursive] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| {
                let clock = AppClock::with_mode(mode);
                for i in 0..1_000 {
                    clock
                        .schedule_absolute(
                            scattered_time(i),
                            Schedulable::callback(|beats, _, _| {
                                black_box(beats);
                                Ok(None)
                            }),
                        )
                        .unwrap();
                }
                black_box(clock.advance(1_000.0));
            });
        });
    }
    group.finish();
}

fn bench_app_clock_repeating_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_clock_repeating_tasks");

    for tasks in [10_u64, 100] {
        group.throughput(Throughput::Elements(tasks * 100));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let clock = AppClock::new_default();
                for i in 0..tasks {
                    let task = Task::from_fn(|cx| {
                        black_box(cx.random());
                        Ok(Yield::Wait(1.0))
                    });
                    #[allow(clippy::cast_precision_loss)]
                    let at = i as f64 / tasks as f64;
                    clock.schedule_absolute(at, task).unwrap();
                }
                black_box(clock.advance(99.5));
            });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_push_pop,
    bench_queue_equal_times,
    bench_queue_drain_due
);

criterion_group!(
    clock_benches,
    bench_app_clock_callbacks,
    bench_app_clock_repeating_tasks
);

criterion_main!(queue_benches, clock_benches);
