//! Buffer cache errors.

use thiserror::Error;

use super::desc::BufId;
use crate::disk::DiskError;
use crate::types::{BlockNo, DeviceId};

/// Result type for buffer cache operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer cache operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every descriptor in the pool is referenced.
    #[error("no free buffers: all {capacity} buffers are referenced")]
    NoFreeBuffers { capacity: usize },

    /// Write or release on a buffer whose content lock the caller does not hold.
    #[error("buffer {id} is not held by the calling thread")]
    NotHeld { id: BufId },

    /// The calling thread already holds the requested block.
    #[error("block {blockno} of device {dev} is already held by the calling thread")]
    AlreadyHeld { dev: DeviceId, blockno: BlockNo },

    /// Unpin of a buffer with no outstanding references.
    #[error("buffer {id} has no references to drop")]
    RefcountUnderflow { id: BufId },

    /// Handle does not name a descriptor of this cache.
    #[error("invalid buffer handle {id}")]
    InvalidHandle { id: BufId },

    /// Device block size differs from the configured buffer size.
    #[error("device block size {device} does not match buffer size {buffer}")]
    BlockSizeMismatch { device: usize, buffer: usize },

    /// Failure reported by the block device.
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    /// Cache metadata failed a consistency check.
    #[error("cache inconsistency: {message}")]
    Inconsistent { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a consistency-check error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Returns true for conditions the caller cannot recover from at this
    /// layer: pool exhaustion and caller bugs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoFreeBuffers { .. }
                | Self::NotHeld { .. }
                | Self::AlreadyHeld { .. }
                | Self::RefcountUnderflow { .. }
                | Self::InvalidHandle { .. }
                | Self::Inconsistent { .. }
        )
    }

    /// Returns true if the error was raised by the block device.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Disk(_))
    }
}
