//! Global type definitions
//!
//! Identifiers and sizing constants shared by the disk layer and the buffer cache.

/// Device identifier type
pub type DeviceId = u32;

/// Block number type (index of a block on its device)
pub type BlockNo = u32;

/// Recency timestamp type (tick value)
pub type Tick = u64;

/// Size of one disk block in bytes
pub const BLOCK_SIZE: usize = 1024;

/// Largest number of blocks a single filesystem operation writes
pub const MAXOPBLOCKS: usize = 10;

/// Default number of buffer descriptors in the cache
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Default number of buckets the pool is partitioned into
pub const NBUCKET: usize = 13;

/// Cache line size - varies by architecture
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const CACHELINE_SIZE: usize = 64;

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
pub const CACHELINE_SIZE: usize = 128;

#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "arm",
    target_arch = "aarch64"
)))]
pub const CACHELINE_SIZE: usize = 64;
