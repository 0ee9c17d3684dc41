use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

// Reference the main crate
extern crate bcache;

use bcache::infrastructure::lwlock::{SleepLock, SpinLock};

// Test configuration
const THREADS: usize = 4;
const OPERATIONS_PER_THREAD: usize = 10_000;

// Runs `op` from THREADS threads against one shared lock
fn bench_contended<T: Send + Sync + 'static>(
    b: &mut criterion::Bencher,
    create_lock: fn() -> Arc<T>,
    op: fn(&T),
) {
    b.iter(|| {
        let lock = create_lock();

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..OPERATIONS_PER_THREAD {
                        op(&lock);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    });
}

// Sleep lock guarding a counter the way buffer contents are guarded
struct GuardedCounter {
    lock: SleepLock,
    value: AtomicUsize,
}

pub fn bench_contended_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("ContendedLock");

    group.bench_function("SpinLock", |b| {
        bench_contended(
            b,
            || Arc::new(SpinLock::new(0usize, "bench")),
            |lock: &SpinLock<usize>| *lock.lock() += 1,
        )
    });

    group.bench_function("SleepLock", |b| {
        bench_contended(
            b,
            || {
                Arc::new(GuardedCounter {
                    lock: SleepLock::new("bench"),
                    value: AtomicUsize::new(0),
                })
            },
            |counter: &GuardedCounter| {
                counter.lock.acquire();
                counter.value.fetch_add(1, Ordering::Relaxed);
                let _ = counter.lock.release();
            },
        )
    });

    group.bench_function("StdMutex", |b| {
        bench_contended(
            b,
            || Arc::new(std::sync::Mutex::new(0usize)),
            |lock: &std::sync::Mutex<usize>| *lock.lock().unwrap() += 1,
        )
    });

    group.finish();
}

pub fn bench_uncontended_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("UncontendedLock");

    let spin = SpinLock::new(0usize, "bench");
    group.bench_function("SpinLock", |b| b.iter(|| *spin.lock() += 1));

    let sleep = SleepLock::new("bench");
    group.bench_function("SleepLock", |b| {
        b.iter(|| {
            sleep.acquire();
            let _ = sleep.release();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_contended_locks, bench_uncontended_locks);
criterion_main!(benches);
