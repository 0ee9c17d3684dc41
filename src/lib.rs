//! bcache block buffer cache library

// Global type definitions
pub mod types;

// Import various modules
pub mod buffer;
pub mod disk;
pub mod infrastructure;

// Re-export cache items for easier access
pub use buffer::{BufGuard, BufId, BufferCache, BufferError, BufferResult, CacheConfig, CacheStats};

// Re-export disk items for easier access
pub use disk::{BlockDevice, DiskError};
