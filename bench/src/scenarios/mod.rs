//! Benchmark scenarios module

use bcache::buffer::{BufferCache, BufferResult};
use bcache::types::BlockNo;
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Device every scenario reads from
pub const BENCH_DEVICE: u32 = 1;

/// Scenario trait - defines a benchmark scenario
pub trait Scenario: Send + Sync {
    /// Execute one iteration of the scenario
    fn execute(&self, cache: &BufferCache, rng: &mut StdRng) -> BufferResult<()>;

    /// Scenario name as given on the command line
    fn name(&self) -> &'static str;
}

/// Builds a scenario by name over a working set of `blocks` blocks
pub fn by_name(name: &str, blocks: u32) -> Option<Box<dyn Scenario>> {
    let blocks = blocks.max(1);
    let scenario: Box<dyn Scenario> = match name {
        "hot_read" => Box::new(HotRead::new(blocks)),
        "uniform_read" => Box::new(UniformRead::new(blocks)),
        "read_write" => Box::new(ReadWrite::new(blocks)),
        "scan" => Box::new(Scan::new(blocks)),
        _ => return None,
    };
    Some(scenario)
}

fn read_once(cache: &BufferCache, blockno: BlockNo) -> BufferResult<()> {
    let buf = cache.read(BENCH_DEVICE, blockno)?;
    std::hint::black_box(buf.data()[0]);
    buf.release()
}

/// Hot read scenario - 90% of reads go to a tenth of the working set
pub struct HotRead {
    blocks: u32,
    hot: u32,
}

impl HotRead {
    pub fn new(blocks: u32) -> Self {
        Self {
            blocks,
            hot: (blocks / 10).max(1),
        }
    }
}

impl Scenario for HotRead {
    fn execute(&self, cache: &BufferCache, rng: &mut StdRng) -> BufferResult<()> {
        let blockno = if rng.gen_bool(0.9) {
            rng.gen_range(0..self.hot)
        } else {
            rng.gen_range(0..self.blocks)
        };
        read_once(cache, blockno)
    }

    fn name(&self) -> &'static str {
        "hot_read"
    }
}

/// Uniform read scenario - every block equally likely
pub struct UniformRead {
    blocks: u32,
}

impl UniformRead {
    pub fn new(blocks: u32) -> Self {
        Self { blocks }
    }
}

impl Scenario for UniformRead {
    fn execute(&self, cache: &BufferCache, rng: &mut StdRng) -> BufferResult<()> {
        read_once(cache, rng.gen_range(0..self.blocks))
    }

    fn name(&self) -> &'static str {
        "uniform_read"
    }
}

/// Read write scenario - one in five reads modifies the block and writes it back
pub struct ReadWrite {
    blocks: u32,
}

impl ReadWrite {
    pub fn new(blocks: u32) -> Self {
        Self { blocks }
    }
}

impl Scenario for ReadWrite {
    fn execute(&self, cache: &BufferCache, rng: &mut StdRng) -> BufferResult<()> {
        let blockno = rng.gen_range(0..self.blocks);
        let mut buf = cache.read(BENCH_DEVICE, blockno)?;
        if rng.gen_ratio(1, 5) {
            let data = buf.data_mut();
            data[0] = data[0].wrapping_add(1);
            buf.write()?;
        }
        buf.release()
    }

    fn name(&self) -> &'static str {
        "read_write"
    }
}

/// Scan scenario - all threads walk the working set in order
pub struct Scan {
    blocks: u32,
    cursor: AtomicU32,
}

impl Scan {
    pub fn new(blocks: u32) -> Self {
        Self {
            blocks,
            cursor: AtomicU32::new(0),
        }
    }
}

impl Scenario for Scan {
    fn execute(&self, cache: &BufferCache, _rng: &mut StdRng) -> BufferResult<()> {
        let blockno = self.cursor.fetch_add(1, Ordering::Relaxed) % self.blocks;
        read_once(cache, blockno)
    }

    fn name(&self) -> &'static str {
        "scan"
    }
}
