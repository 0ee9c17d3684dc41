//! bcache demo program entry
//!
//! Runs a few threads of read-modify-write traffic through a cache over an
//! in-memory disk and prints the resulting statistics. An optional argument
//! names a JSON cache configuration file.

// Use jemalloc as global allocator
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use bcache::buffer::{BufferCache, BufferResult, CacheConfig, CacheStats};
use bcache::disk::MemDisk;
use bcache::infrastructure::ticks::MonotonicTicks;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEMO_DEVICE: u32 = 1;
const WORKERS: usize = 4;
const ROUNDS: usize = 2_000;
const BLOCKS: usize = 64;

fn main() -> ExitCode {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => CacheConfig::load(path),
        None => Ok(CacheConfig::default()),
    };

    match config.and_then(run) {
        Ok(stats) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).unwrap_or_default()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "bcache demo failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn run(config: CacheConfig) -> BufferResult<CacheStats> {
    info!(
        buffers = config.num_buffers,
        buckets = config.num_buckets,
        block_size = config.block_size,
        "starting bcache demo"
    );
    let disk = Arc::new(MemDisk::new(config.block_size));
    let cache = BufferCache::new(config, disk, Arc::new(MonotonicTicks::new()))?;

    // Each worker holds at most one buffer at a time.
    let workers = WORKERS.min(cache.capacity());
    let cache = &cache;
    thread::scope(|s| -> BufferResult<()> {
        let handles: Vec<_> = (0..workers)
            .map(|worker| s.spawn(move || bump_blocks(cache, worker)))
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(())
    })?;

    cache.verify()?;
    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_ratio = stats.hit_ratio(),
        "bcache demo completed"
    );
    Ok(stats)
}

/// Increments a counter stored in the first bytes of a spread of blocks
fn bump_blocks(cache: &BufferCache, worker: usize) -> BufferResult<()> {
    for round in 0..ROUNDS {
        let blockno = ((worker * 7 + round * 3) % BLOCKS) as u32;
        let mut buf = cache.read(DEMO_DEVICE, blockno)?;
        let data = buf.data_mut();
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&data[..8]);
        let next = u64::from_le_bytes(counter) + 1;
        data[..8].copy_from_slice(&next.to_le_bytes());
        buf.write()?;
        buf.release()?;
    }
    Ok(())
}
