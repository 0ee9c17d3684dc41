//! Buffer cache configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{BufferError, BufferResult};
use crate::types::{BLOCK_SIZE, NBUCKET, NBUF};

/// Smallest block size accepted.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Configuration for the buffer cache.
///
/// Capacity is fixed once the cache is built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of buffer descriptors in the pool.
    pub num_buffers: usize,
    /// Number of buckets the pool is partitioned into.
    pub num_buckets: usize,
    /// Payload size of every buffer, equal to the device block size.
    pub block_size: usize,
}

impl CacheConfig {
    /// Creates a configuration with `num_buffers` descriptors and default
    /// bucket count and block size.
    pub fn new(num_buffers: usize) -> Self {
        Self {
            num_buffers,
            num_buckets: NBUCKET,
            block_size: BLOCK_SIZE,
        }
    }

    /// Sets the number of buckets.
    pub fn with_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Parses a configuration from JSON; missing fields take defaults.
    pub fn from_json_str(json: &str) -> BufferResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| BufferError::config(format!("invalid cache config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> BufferResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            BufferError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // A struct of plain integers always serializes.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Total payload memory held by the pool.
    pub fn memory_usage(&self) -> usize {
        self.num_buffers * self.block_size
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BufferResult<()> {
        if self.num_buffers == 0 {
            return Err(BufferError::config("num_buffers must be > 0"));
        }
        if self.num_buckets == 0 {
            return Err(BufferError::config("num_buckets must be > 0"));
        }
        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE {
            return Err(BufferError::config(format!(
                "block_size must be a power of two >= {MIN_BLOCK_SIZE}"
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(NBUF)
    }
}
