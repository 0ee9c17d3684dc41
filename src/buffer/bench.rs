use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

// Reference the main crate
extern crate bcache;

use bcache::buffer::{BufferCache, CacheConfig};
use bcache::disk::MemDisk;
use bcache::infrastructure::ticks::TickCounter;

// Test configuration
const BLOCK_SIZE: usize = 1024;
const THREADS: usize = 4;
const OPERATIONS_PER_THREAD: usize = 5_000;

fn build_cache(num_buffers: usize, num_buckets: usize) -> Arc<BufferCache> {
    let config = CacheConfig::new(num_buffers)
        .with_buckets(num_buckets)
        .with_block_size(BLOCK_SIZE);
    let cache = BufferCache::new(
        config,
        Arc::new(MemDisk::new(BLOCK_SIZE)),
        Arc::new(TickCounter::new()),
    )
    .unwrap();
    Arc::new(cache)
}

// Every read hits once the working set is warm
pub fn bench_hot_reads(c: &mut Criterion) {
    let cache = build_cache(64, 13);
    let mut blockno = 0u32;

    c.bench_function("BufferCache/hot_read", |b| {
        b.iter(|| {
            blockno = (blockno + 1) % 32;
            let buf = cache.read(1, blockno).unwrap();
            criterion::black_box(buf.data()[0]);
            buf.release().unwrap();
        })
    });
}

// Working set larger than the pool: every read evicts
pub fn bench_evicting_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferCache/evicting_read");

    for num_buckets in [1usize, 13, 31] {
        let cache = build_cache(30, num_buckets);
        let mut blockno = 0u32;
        group.bench_with_input(
            BenchmarkId::from_parameter(num_buckets),
            &num_buckets,
            |b, _| {
                b.iter(|| {
                    blockno = blockno.wrapping_add(1);
                    cache.read(1, blockno).unwrap().release().unwrap();
                })
            },
        );
    }

    group.finish();
}

// Threads reading disjoint block ranges through shared buckets
pub fn bench_contended_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferCache/contended_read");

    for num_buckets in [1usize, 13] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_buckets),
            &num_buckets,
            |b, &num_buckets| {
                b.iter(|| {
                    let cache = build_cache(64, num_buckets);
                    let handles: Vec<_> = (0..THREADS)
                        .map(|t| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                let base = (t * 100) as u32;
                                for i in 0..OPERATIONS_PER_THREAD {
                                    let blockno = base + (i % 24) as u32;
                                    cache.read(1, blockno).unwrap().release().unwrap();
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hot_reads,
    bench_evicting_reads,
    bench_contended_reads
);
criterion_main!(benches);
