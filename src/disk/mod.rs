//! Disk module
//!
//! The block I/O primitive the buffer cache sits on top of, with an
//! in-memory device and an image-file device built on positioned
//! `pread`/`pwrite` system calls.

pub mod error;
pub use error::{DiskError, DiskResult};

pub mod mem;
pub use mem::MemDisk;

pub mod file;
pub use file::FileDisk;

use crate::types::{BlockNo, DeviceId};

/// Block device trait
///
/// Transfers exactly one block between a caller buffer and the device.
/// Implementations may block the calling thread until the transfer completes.
pub trait BlockDevice: Send + Sync {
    /// Read block `blockno` of device `dev` into `buf`
    ///
    /// # Arguments
    /// * `dev` - Device identifier
    /// * `blockno` - Block number on the device
    /// * `buf` - Destination, exactly one block long
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DiskResult<()>;

    /// Write `buf` to block `blockno` of device `dev`
    ///
    /// # Arguments
    /// * `dev` - Device identifier
    /// * `blockno` - Block number on the device
    /// * `buf` - Source, exactly one block long
    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DiskResult<()>;

    /// Block size of the device in bytes
    fn block_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
