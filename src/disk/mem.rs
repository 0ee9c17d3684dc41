//! In-memory block device

use crate::disk::error::{DiskError, DiskResult};
use crate::disk::BlockDevice;
use crate::types::{BlockNo, DeviceId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

type BlockKey = (DeviceId, BlockNo);

/// Sparse in-memory disk.
///
/// Blocks that were never written read back as zeros. Every transfer is
/// counted, and individual blocks can be made to fail, so the device doubles
/// as an observable test backend.
pub struct MemDisk {
    block_size: usize,
    blocks: RwLock<HashMap<BlockKey, Box<[u8]>>>,
    /// Reads issued per block
    read_counts: Mutex<HashMap<BlockKey, u64>>,
    reads: AtomicU64,
    writes: AtomicU64,
    failing_reads: Mutex<HashSet<BlockKey>>,
    failing_writes: Mutex<HashSet<BlockKey>>,
    /// Artificial delay applied to every read, in nanoseconds
    read_latency_ns: AtomicU64,
}

impl MemDisk {
    pub fn new(block_size: usize) -> Self {
        MemDisk {
            block_size,
            blocks: RwLock::new(HashMap::new()),
            read_counts: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            read_latency_ns: AtomicU64::new(0),
        }
    }

    /// Sets a delay applied to every read
    pub fn with_read_latency(self, latency: Duration) -> Self {
        self.set_read_latency(latency);
        self
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ns
            .store(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Stores block contents directly, bypassing the transfer counters
    pub fn put(&self, dev: DeviceId, blockno: BlockNo, data: &[u8]) -> DiskResult<()> {
        self.check_len(data.len())?;
        self.blocks
            .write()
            .insert((dev, blockno), data.to_vec().into_boxed_slice());
        Ok(())
    }

    /// Returns the stored contents of a block, if it was ever written
    pub fn block(&self, dev: DeviceId, blockno: BlockNo) -> Option<Vec<u8>> {
        self.blocks.read().get(&(dev, blockno)).map(|b| b.to_vec())
    }

    /// Makes every later read of the block fail
    pub fn fail_reads(&self, dev: DeviceId, blockno: BlockNo) {
        self.failing_reads.lock().insert((dev, blockno));
    }

    /// Makes every later write of the block fail
    pub fn fail_writes(&self, dev: DeviceId, blockno: BlockNo) {
        self.failing_writes.lock().insert((dev, blockno));
    }

    /// Clears injected failures for the block
    pub fn heal(&self, dev: DeviceId, blockno: BlockNo) {
        self.failing_reads.lock().remove(&(dev, blockno));
        self.failing_writes.lock().remove(&(dev, blockno));
    }

    /// Total reads issued
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total writes issued
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Reads issued for one block
    pub fn reads_of(&self, dev: DeviceId, blockno: BlockNo) -> u64 {
        self.read_counts
            .lock()
            .get(&(dev, blockno))
            .copied()
            .unwrap_or(0)
    }

    fn check_len(&self, len: usize) -> DiskResult<()> {
        if len != self.block_size {
            return Err(DiskError::BadBufferSize {
                expected: self.block_size,
                actual: len,
            });
        }
        Ok(())
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        *self.read_counts.lock().entry((dev, blockno)).or_insert(0) += 1;

        let latency = self.read_latency_ns.load(Ordering::Relaxed);
        if latency > 0 {
            std::thread::sleep(Duration::from_nanos(latency));
        }

        if self.failing_reads.lock().contains(&(dev, blockno)) {
            return Err(DiskError::Media { dev, blockno });
        }

        match self.blocks.read().get(&(dev, blockno)) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        trace!(dev, blockno, "memdisk read");
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        if self.failing_writes.lock().contains(&(dev, blockno)) {
            return Err(DiskError::Media { dev, blockno });
        }

        self.blocks
            .write()
            .insert((dev, blockno), buf.to_vec().into_boxed_slice());
        trace!(dev, blockno, "memdisk write");
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}
