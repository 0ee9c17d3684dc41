//! Disk error definitions

use crate::types::{BlockNo, DeviceId};
use thiserror::Error;

/// Disk error types
#[derive(Debug, Error)]
pub enum DiskError {
    /// Device was never attached
    #[error("unknown device {dev}")]
    UnknownDevice { dev: DeviceId },

    /// Block number lies beyond the end of the device
    #[error("block {blockno} out of range on device {dev} ({nblocks} blocks)")]
    OutOfRange {
        dev: DeviceId,
        blockno: BlockNo,
        nblocks: u64,
    },

    /// Caller buffer does not match the device block size
    #[error("buffer of {actual} bytes does not match block size {expected}")]
    BadBufferSize { expected: usize, actual: usize },

    /// Fewer bytes than a whole block were transferred
    #[error("short {op} on device {dev} block {blockno}: {actual} of {expected} bytes")]
    ShortTransfer {
        op: &'static str,
        dev: DeviceId,
        blockno: BlockNo,
        expected: usize,
        actual: usize,
    },

    /// System call error with error code
    #[error("system error (errno {errno}): {op} failed")]
    System { errno: i32, op: &'static str },

    /// Injected or device-reported media failure
    #[error("media error on device {dev} block {blockno}")]
    Media { dev: DeviceId, blockno: BlockNo },

    /// Path could not be passed to the OS
    #[error("invalid path: {0}")]
    InvalidPath(#[from] std::ffi::NulError),
}

impl DiskError {
    /// Builds a `System` error from the calling thread's errno
    pub fn last_os_error(op: &'static str) -> Self {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        DiskError::System { errno, op }
    }
}

/// Result type for disk operations
pub type DiskResult<T> = Result<T, DiskError>;
