//! Bucketed block buffer cache
//!
//! A fixed pool of block-sized buffers shared by all threads. Descriptors
//! are partitioned over hash buckets by block number; each bucket has its
//! own short lock so lookups of different blocks rarely contend. When a
//! bucket has no free descriptor, a miss takes the global eviction lock and
//! steals the least recently released free descriptor from anywhere in the
//! pool, moving it into the requesting block's bucket.
//!
//! Lock order: target bucket, then global eviction lock, then victim bucket.
//! The victim bucket is only ever try-locked. Bucket and global locks are
//! never held across disk I/O or a content-lock wait; the per-buffer content
//! lock may be.

mod bucket;
pub mod config;
pub mod desc;
pub mod error;
pub mod stats;

pub use config::CacheConfig;
pub use desc::{BufId, BufferDesc};
pub use error::{BufferError, BufferResult};
pub use stats::CacheStats;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::MutexGuard;
use tracing::{debug, error, trace, warn};

use crate::disk::BlockDevice;
use crate::infrastructure::lwlock::SpinLock;
use crate::infrastructure::ticks::TickSource;
use crate::types::{BlockNo, DeviceId};
use bucket::{Bucket, RecencyList};
use stats::{StatCounters, bump};

/// Shared block buffer cache.
pub struct BufferCache {
    config: CacheConfig,
    descs: Box<[BufferDesc]>,
    buckets: Box<[Bucket]>,
    /// Serializes global victim scans and cross-bucket moves
    evict_lock: SpinLock<()>,
    /// Number of descriptors with a zero reference count
    free: AtomicUsize,
    disk: Arc<dyn BlockDevice>,
    ticks: Arc<dyn TickSource>,
    stats: StatCounters,
}

impl BufferCache {
    /// Builds the pool: every descriptor starts unreferenced, invalid and
    /// linked into bucket 0 with timestamp 0.
    pub fn new(
        config: CacheConfig,
        disk: Arc<dyn BlockDevice>,
        ticks: Arc<dyn TickSource>,
    ) -> BufferResult<Self> {
        config.validate()?;
        if disk.block_size() != config.block_size {
            return Err(BufferError::BlockSizeMismatch {
                device: disk.block_size(),
                buffer: config.block_size,
            });
        }

        let descs: Box<[BufferDesc]> = (0..config.num_buffers)
            .map(|i| BufferDesc::new(BufId::new(i), config.block_size))
            .collect();
        let buckets: Box<[Bucket]> = (0..config.num_buckets).map(|_| Bucket::new()).collect();
        {
            let mut first = buckets[0].lock();
            for desc in descs.iter() {
                first.push_front(desc.id());
            }
        }

        debug!(
            buffers = config.num_buffers,
            buckets = config.num_buckets,
            block_size = config.block_size,
            "buffer cache initialized"
        );

        Ok(Self {
            free: AtomicUsize::new(descs.len()),
            config,
            descs,
            buckets,
            evict_lock: SpinLock::new((), "bcache.evict"),
            disk,
            ticks,
            stats: StatCounters::default(),
        })
    }

    /// Returns the buffer holding block `blockno` of device `dev` with its
    /// content lock held by the calling thread. The payload is loaded from
    /// the device if it was not already valid.
    ///
    /// A read failure drops the claim and leaves the buffer invalid, so the
    /// next read of the block retries the transfer.
    pub fn read(&self, dev: DeviceId, blockno: BlockNo) -> BufferResult<BufGuard<'_>> {
        let mut buf = self.get(dev, blockno)?;
        if !buf.is_valid() {
            self.fill(&mut buf)?;
        }
        Ok(buf)
    }

    /// Like `read`, but never touches the device: the returned buffer may
    /// be invalid (`BufGuard::is_valid`). Useful when the caller is about to
    /// overwrite the whole block.
    pub fn get(&self, dev: DeviceId, blockno: BlockNo) -> BufferResult<BufGuard<'_>> {
        let id = self.lookup_or_allocate(dev, blockno)?;
        Ok(BufGuard::new(self, id))
    }

    /// Writes the payload of a held buffer to its block.
    pub fn write(&self, buf: &BufGuard<'_>) -> BufferResult<()> {
        let desc = self.held_desc(buf)?;
        let (dev, blockno) = (desc.dev(), desc.blockno());
        // SAFETY: held_desc checked that this thread owns the content lock.
        let data = unsafe { desc.data() };
        if let Err(err) = self.disk.write_block(dev, blockno, data) {
            warn!(dev, blockno, buf = %desc.id(), %err, "block write failed");
            return Err(err.into());
        }
        // The payload now matches the device.
        desc.set_valid(true);
        bump(&self.stats.disk_writes);
        debug!(dev, blockno, buf = %desc.id(), "block written");
        Ok(())
    }

    /// Releases a held buffer. Equivalent to `BufGuard::release`.
    pub fn release(&self, buf: BufGuard<'_>) -> BufferResult<()> {
        if !std::ptr::eq(buf.cache, self) {
            return Err(BufferError::InvalidHandle { id: buf.id });
        }
        buf.release()
    }

    /// Adds a reference to a buffer without taking its content lock, keeping
    /// it resident until the matching `unpin`.
    pub fn pin(&self, id: BufId) -> BufferResult<()> {
        let desc = self.checked_desc(id)?;
        let _list = self.lock_home(desc);
        self.claim(desc);
        trace!(buf = %id, refcnt = desc.refcount(), "buffer pinned");
        Ok(())
    }

    /// Drops a reference added by `pin`.
    pub fn unpin(&self, id: BufId) -> BufferResult<()> {
        let desc = self.checked_desc(id)?;
        let _list = self.lock_home(desc);
        if self.unclaim(desc)? == 0 {
            desc.stamp(self.ticks.now());
        }
        trace!(buf = %id, refcnt = desc.refcount(), "buffer unpinned");
        Ok(())
    }

    fn lookup_or_allocate(&self, dev: DeviceId, blockno: BlockNo) -> BufferResult<BufId> {
        let target = self.bucket_of(blockno);
        let mut list = self.buckets[target].lock();

        let cached = list.iter().find(|&id| self.desc(id).matches(dev, blockno));
        if let Some(id) = cached {
            let desc = self.desc(id);
            self.claim(desc);
            drop(list);
            bump(&self.stats.hits);
            trace!(dev, blockno, buf = %id, "buffer cache hit");

            // Waiting on our own content lock would never return.
            if desc.content_lock().holding() {
                let _list = self.lock_home(desc);
                self.unclaim(desc)?;
                error!(dev, blockno, buf = %id, "block already held by the calling thread");
                return Err(BufferError::AlreadyHeld { dev, blockno });
            }
            desc.content_lock().acquire();
            return Ok(id);
        }
        bump(&self.stats.misses);

        let local = self.oldest_free(list.iter());
        let id = match local {
            Some(id) => {
                bump(&self.stats.local_evictions);
                debug!(dev, blockno, buf = %id, bucket = target, "reusing free buffer in place");
                id
            }
            None => self.steal_victim(target, &mut list)?,
        };

        let desc = self.desc(id);
        desc.assign(dev, blockno);
        self.free.fetch_sub(1, Ordering::AcqRel);
        drop(list);

        desc.content_lock().acquire();
        Ok(id)
    }

    /// Finds the least recently released free descriptor in the whole pool
    /// and links it into bucket `target`, whose lock the caller holds as
    /// `target_list`.
    fn steal_victim(&self, target: usize, target_list: &mut RecencyList) -> BufferResult<BufId> {
        let _evict = self.evict_lock.lock();
        loop {
            let Some(id) = self.oldest_free(self.descs.iter().map(BufferDesc::id)) else {
                if self.free.load(Ordering::Acquire) > 0 {
                    // A release landed after its descriptor was scanned.
                    bump(&self.stats.victim_retries);
                    std::thread::yield_now();
                    continue;
                }
                error!(capacity = self.capacity(), "no free buffers");
                return Err(BufferError::NoFreeBuffers {
                    capacity: self.capacity(),
                });
            };

            let victim = self.desc(id);
            let home = victim.home();

            if home == target {
                // Already a member of the bucket we hold; locking it again
                // would deadlock.
                target_list.move_to_front(id);
                bump(&self.stats.global_evictions);
                debug!(buf = %id, bucket = target, "global victim already in target bucket");
                return Ok(id);
            }

            // A thread holding the victim bucket may be queued on the global
            // lock we hold, so never wait for it.
            let Some(mut home_list) = self.buckets[home].try_lock() else {
                bump(&self.stats.victim_retries);
                debug!(buf = %id, bucket = home, "victim bucket busy, rescanning");
                std::hint::spin_loop();
                continue;
            };

            if !victim.is_free() {
                drop(home_list);
                bump(&self.stats.victim_retries);
                warn!(buf = %id, bucket = home, "victim claimed during scan, rescanning");
                continue;
            }

            home_list.remove(id);
            target_list.push_front(id);
            victim.set_home(target);
            drop(home_list);

            bump(&self.stats.global_evictions);
            debug!(buf = %id, from = home, to = target, "moved victim between buckets");
            return Ok(id);
        }
    }

    /// Free descriptor with the smallest timestamp; the first one wins ties.
    fn oldest_free(&self, ids: impl Iterator<Item = BufId>) -> Option<BufId> {
        ids.filter(|&id| self.desc(id).is_free())
            .min_by_key(|&id| self.desc(id).timestamp())
    }

    fn fill(&self, buf: &mut BufGuard<'_>) -> BufferResult<()> {
        let (dev, blockno, id) = (buf.dev(), buf.blockno(), buf.id());
        if let Err(err) = self.disk.read_block(dev, blockno, buf.data_mut()) {
            warn!(dev, blockno, buf = %id, %err, "block read failed");
            return Err(err.into());
        }
        buf.desc().set_valid(true);
        bump(&self.stats.disk_reads);
        debug!(dev, blockno, buf = %id, "block read");
        Ok(())
    }

    fn release_id(&self, id: BufId) -> BufferResult<()> {
        let desc = self.desc(id);
        if desc.content_lock().release().is_err() {
            error!(buf = %id, "release of buffer not held by the calling thread");
            return Err(BufferError::NotHeld { id });
        }

        let _list = self.lock_home(desc);
        if self.unclaim(desc)? == 0 {
            desc.stamp(self.ticks.now());
        }
        Ok(())
    }

    /// Caller holds the home bucket lock.
    fn claim(&self, desc: &BufferDesc) {
        if desc.acquire_ref() == 0 {
            self.free.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Caller holds the home bucket lock. Returns the new reference count.
    fn unclaim(&self, desc: &BufferDesc) -> BufferResult<u32> {
        match desc.drop_ref() {
            Some(0) => {
                self.free.fetch_add(1, Ordering::AcqRel);
                Ok(0)
            }
            Some(count) => Ok(count),
            None => {
                error!(buf = %desc.id(), "reference count underflow");
                Err(BufferError::RefcountUnderflow { id: desc.id() })
            }
        }
    }

    /// Locks the bucket `desc` currently belongs to.
    fn lock_home(&self, desc: &BufferDesc) -> MutexGuard<'_, RecencyList> {
        loop {
            let home = desc.home();
            let list = self.buckets[home].lock();
            // A free descriptor may have been moved before we got the lock.
            if desc.home() == home {
                return list;
            }
        }
    }

    fn held_desc(&self, buf: &BufGuard<'_>) -> BufferResult<&BufferDesc> {
        if !std::ptr::eq(buf.cache, self) {
            return Err(BufferError::InvalidHandle { id: buf.id });
        }
        let desc = self.desc(buf.id);
        if !desc.content_lock().holding() {
            error!(buf = %buf.id, "buffer not held by the calling thread");
            return Err(BufferError::NotHeld { id: buf.id });
        }
        Ok(desc)
    }

    #[inline]
    fn desc(&self, id: BufId) -> &BufferDesc {
        &self.descs[id.index()]
    }

    fn checked_desc(&self, id: BufId) -> BufferResult<&BufferDesc> {
        self.descs
            .get(id.index())
            .ok_or(BufferError::InvalidHandle { id })
    }

    /// Number of buffers in the pool.
    pub fn capacity(&self) -> usize {
        self.descs.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Bucket a block number hashes to.
    #[inline]
    pub fn bucket_of(&self, blockno: BlockNo) -> usize {
        blockno as usize % self.buckets.len()
    }

    /// Members of a bucket, most recently linked first.
    pub fn bucket_members(&self, bucket: usize) -> Option<Vec<BufId>> {
        self.buckets
            .get(bucket)
            .map(|b| b.lock().iter().collect())
    }

    /// Buffer currently caching a block, without claiming it.
    pub fn lookup(&self, dev: DeviceId, blockno: BlockNo) -> Option<BufId> {
        let list = self.buckets[self.bucket_of(blockno)].lock();
        list.iter().find(|&id| self.desc(id).matches(dev, blockno))
    }

    /// Read-only view of a descriptor's metadata.
    pub fn descriptor(&self, id: BufId) -> BufferResult<&BufferDesc> {
        self.checked_desc(id)
    }

    pub fn refcount(&self, id: BufId) -> BufferResult<u32> {
        Ok(self.checked_desc(id)?.refcount())
    }

    /// Number of unreferenced buffers.
    pub fn free_count(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        let referenced = self.descs.iter().filter(|d| !d.is_free()).count();
        self.stats.snapshot(referenced)
    }

    /// Checks the bucket structure. Meaningful only while no other thread is
    /// using the cache; buckets are locked one at a time.
    pub fn verify(&self) -> BufferResult<()> {
        let mut seen: Vec<Option<usize>> = vec![None; self.capacity()];
        let mut identities: HashMap<(DeviceId, BlockNo), BufId> = HashMap::new();

        for (index, bucket) in self.buckets.iter().enumerate() {
            let list = bucket.lock();
            for id in list.iter() {
                let desc = self.checked_desc(id).map_err(|_| {
                    BufferError::inconsistent(format!("bucket {index} links unknown {id}"))
                })?;
                if let Some(other) = seen[id.index()].replace(index) {
                    return Err(BufferError::inconsistent(format!(
                        "{id} linked into buckets {other} and {index}"
                    )));
                }
                if desc.home() != index {
                    return Err(BufferError::inconsistent(format!(
                        "{id} linked into bucket {index} but records bucket {}",
                        desc.home()
                    )));
                }
                if !desc.is_assigned() {
                    continue;
                }
                let expected = self.bucket_of(desc.blockno());
                if expected != index {
                    return Err(BufferError::inconsistent(format!(
                        "{id} caches block {} of bucket {expected} but sits in bucket {index}",
                        desc.blockno()
                    )));
                }
                if let Some(dup) = identities.insert((desc.dev(), desc.blockno()), id) {
                    return Err(BufferError::inconsistent(format!(
                        "{dup} and {id} both cache block {} of device {}",
                        desc.blockno(),
                        desc.dev()
                    )));
                }
            }
        }

        if let Some(index) = seen.iter().position(Option::is_none) {
            return Err(BufferError::inconsistent(format!(
                "{} is not linked into any bucket",
                BufId::new(index)
            )));
        }
        let free = self.descs.iter().filter(|d| d.is_free()).count();
        if free != self.free_count() {
            return Err(BufferError::inconsistent(format!(
                "{free} free buffers but free count is {}",
                self.free_count()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("config", &self.config)
            .field("free", &self.free_count())
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer whose content lock is held by the current thread.
///
/// Dropping the guard releases the buffer; `release` does the same but
/// reports errors. Guards cannot leave the thread that acquired them.
pub struct BufGuard<'a> {
    cache: &'a BufferCache,
    id: BufId,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> BufGuard<'a> {
    fn new(cache: &'a BufferCache, id: BufId) -> Self {
        BufGuard {
            cache,
            id,
            released: false,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> BufId {
        self.id
    }

    pub fn dev(&self) -> DeviceId {
        self.desc().dev()
    }

    pub fn blockno(&self) -> BlockNo {
        self.desc().blockno()
    }

    /// True if the payload holds the block's on-disk contents
    pub fn is_valid(&self) -> bool {
        self.desc().is_valid()
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: a live guard means this thread holds the content lock.
        unsafe { self.desc().data() }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` rules out other payload borrows.
        unsafe { self.desc().data_mut() }
    }

    /// Writes the payload to the device
    pub fn write(&self) -> BufferResult<()> {
        self.cache.write(self)
    }

    /// Releases the content lock and the reference
    pub fn release(mut self) -> BufferResult<()> {
        self.released = true;
        self.cache.release_id(self.id)
    }

    fn desc(&self) -> &'a BufferDesc {
        self.cache.desc(self.id)
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.cache.release_id(self.id) {
            error!(buf = %self.id, %err, "failed to release buffer on drop");
        }
    }
}

impl fmt::Debug for BufGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufGuard")
            .field("id", &self.id)
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .field("valid", &self.is_valid())
            .finish()
    }
}
