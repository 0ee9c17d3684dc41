//! Buffer cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, bumped lock-free on the hot path
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) local_evictions: AtomicU64,
    pub(crate) global_evictions: AtomicU64,
    pub(crate) victim_retries: AtomicU64,
    pub(crate) disk_reads: AtomicU64,
    pub(crate) disk_writes: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatCounters {
    pub(crate) fn snapshot(&self, referenced: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            local_evictions: self.local_evictions.load(Ordering::Relaxed),
            global_evictions: self.global_evictions.load(Ordering::Relaxed),
            victim_retries: self.victim_retries.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            referenced,
        }
    }
}

/// Buffer cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found the block cached.
    pub hits: u64,
    /// Lookups that had to claim a descriptor.
    pub misses: u64,
    /// Misses served by a free descriptor of the block's own bucket.
    pub local_evictions: u64,
    /// Misses served by the global victim scan.
    pub global_evictions: u64,
    /// Global scans that lost a race for the victim and rescanned.
    pub victim_retries: u64,
    /// Block reads issued to the device.
    pub disk_reads: u64,
    /// Block writes issued to the device.
    pub disk_writes: u64,
    /// Descriptors with a non-zero reference count when sampled.
    pub referenced: usize,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Returns the cache hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
