//! bcache Benchmark Tool

use bcache::buffer::{BufferCache, CacheConfig};
use bcache::disk::MemDisk;
use bcache::infrastructure::ticks::MonotonicTicks;
use clap::Parser;
use rand::SeedableRng;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod metrics;
mod scenarios;

use metrics::Metrics;
use scenarios::Scenario;

#[derive(Parser, Debug, Clone)]
#[command(name = "bcache-bench")]
#[command(about = "bcache buffer cache stress tool")]
struct Args {
    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// hot_read, uniform_read, read_write or scan
    #[arg(short = 's', long, default_value = "uniform_read")]
    scenario: String,

    /// Number of distinct blocks touched
    #[arg(short = 'b', long, default_value = "256")]
    blocks: u32,

    #[arg(long, default_value = "64")]
    buffers: usize,

    #[arg(long, default_value = "13")]
    buckets: usize,

    /// JSON cache configuration; overrides --buffers and --buckets
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Simulated device read latency in microseconds
    #[arg(long, default_value = "0")]
    read_latency_us: u64,

    #[arg(short = 'w', long, default_value = "0")]
    warmup: u64,

    #[arg(long, default_value = "0")]
    seed: u64,
}

fn run_thread(
    thread_id: usize,
    cache: &BufferCache,
    scenario: &dyn Scenario,
    stop_flag: &AtomicBool,
    metrics: &Metrics,
    seed: u64,
) {
    let seed = seed.wrapping_add(thread_id as u64 * 0x9e3779b97f4a7c15);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    while !stop_flag.load(Ordering::Relaxed) {
        let start = Instant::now();
        match scenario.execute(cache, &mut rng) {
            Ok(()) => metrics.record_op(start.elapsed().as_nanos() as u64),
            Err(err) => {
                metrics.record_error();
                if err.is_fatal() {
                    warn!(thread_id, %err, "operation failed");
                }
            }
        }
    }
}

fn load_config(args: &Args) -> Result<CacheConfig, String> {
    let config = match &args.config {
        Some(path) => CacheConfig::load(path).map_err(|err| err.to_string())?,
        None => CacheConfig::new(args.buffers).with_buckets(args.buckets),
    };
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let Some(scenario) = scenarios::by_name(&args.scenario, args.blocks) else {
        eprintln!("Unknown scenario: {}", args.scenario);
        return ExitCode::FAILURE;
    };
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid cache configuration");
            return ExitCode::FAILURE;
        }
    };

    println!("bcache Benchmark Tool");
    println!("=====================");
    println!("Scenario: {}", scenario.name());
    println!("Threads: {}", args.threads);
    println!("Duration: {}s", args.duration);
    println!("Blocks: {}", args.blocks);
    println!(
        "Cache: {} buffers, {} buckets, {} byte blocks",
        config.num_buffers, config.num_buckets, config.block_size
    );
    println!();

    let disk = MemDisk::new(config.block_size)
        .with_read_latency(Duration::from_micros(args.read_latency_us));
    let cache = match BufferCache::new(config, Arc::new(disk), Arc::new(MonotonicTicks::new())) {
        Ok(cache) => cache,
        Err(err) => {
            error!(%err, "failed to build cache");
            return ExitCode::FAILURE;
        }
    };
    if args.threads > cache.capacity() {
        warn!(
            threads = args.threads,
            capacity = cache.capacity(),
            "more threads than buffers; expect exhaustion errors"
        );
    }

    if args.warmup > 0 {
        println!("Warming up for {}s...", args.warmup);
        std::thread::sleep(Duration::from_secs(args.warmup));
    }

    println!("Running benchmark...");
    let stop_flag = AtomicBool::new(false);
    let metrics = Metrics::new();
    let start_time = Instant::now();

    std::thread::scope(|s| {
        for i in 0..args.threads {
            let cache = &cache;
            let scenario = scenario.as_ref();
            let stop = &stop_flag;
            let metrics = &metrics;
            let seed = args.seed;
            s.spawn(move || run_thread(i, cache, scenario, stop, metrics, seed));
        }

        std::thread::sleep(Duration::from_secs(args.duration));
        stop_flag.store(true, Ordering::Relaxed);
    });

    let elapsed = start_time.elapsed();
    let total_ops = metrics.total_ops();
    let ops_per_sec = total_ops as f64 / elapsed.as_secs_f64();
    let stats = cache.stats();

    println!();
    println!("Cache statistics:");
    println!("    operations:        {:>12} ({:.1} ops/s)", total_ops, ops_per_sec);
    println!(
        "    latency:           {:8.2} us (avg), {:8.2} us (max)",
        metrics.avg_latency_us(),
        metrics.max_latency_us()
    );
    println!("    errors:            {:>12}", metrics.total_errors());
    println!(
        "    hits / misses:     {:>12} / {} ({:.1}% hit)",
        stats.hits,
        stats.misses,
        stats.hit_ratio() * 100.0
    );
    println!(
        "    evictions:         {:>12} local, {} global",
        stats.local_evictions, stats.global_evictions
    );
    println!("    victim retries:    {:>12}", stats.victim_retries);
    println!(
        "    disk transfers:    {:>12} reads, {} writes",
        stats.disk_reads, stats.disk_writes
    );

    if let Err(err) = cache.verify() {
        error!(%err, "cache failed verification after run");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
