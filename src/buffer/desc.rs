//! Buffer descriptors: one cache slot per disk block.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::infrastructure::lwlock::SleepLock;
use crate::types::{BlockNo, DeviceId, Tick};

/// Device id of a descriptor that has never held a block.
pub const NO_DEVICE: DeviceId = DeviceId::MAX;

/// Stable handle of a descriptor within its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufId(usize);

impl BufId {
    pub fn new(index: usize) -> Self {
        BufId(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// BufferDesc struct, used to describe one cached block.
///
/// Identity, reference count, timestamp and home bucket change only while
/// the home bucket's lock is held (the home bucket itself changes only under
/// the global eviction lock as well). They are atomics so that the global
/// victim scan can read them without taking every bucket lock; whatever it
/// reads is re-checked under the victim's bucket lock.
///
/// `valid` and the payload belong to the content-lock holder.
/// Aligned to cache line size to prevent false sharing
#[cfg_attr(any(target_arch = "x86", target_arch = "x86_64"), repr(align(64)))]
#[cfg_attr(any(target_arch = "arm", target_arch = "aarch64"), repr(align(128)))]
pub struct BufferDesc {
    id: BufId,
    dev: AtomicU32,
    blockno: AtomicU32,
    /// Payload holds the block's on-disk contents
    valid: AtomicBool,
    refcnt: AtomicU32,
    /// Tick of the last release that dropped `refcnt` to zero
    timestamp: AtomicU64,
    /// Index of the bucket whose list holds this descriptor
    home: AtomicUsize,
    content_lock: SleepLock,
    data: UnsafeCell<Box<[u8]>>,
}

// The payload is only touched by the owner of `content_lock`; every other
// field is atomic.
unsafe impl Sync for BufferDesc {}

impl BufferDesc {
    pub(crate) fn new(id: BufId, block_size: usize) -> Self {
        Self {
            id,
            dev: AtomicU32::new(NO_DEVICE),
            blockno: AtomicU32::new(0),
            valid: AtomicBool::new(false),
            refcnt: AtomicU32::new(0),
            timestamp: AtomicU64::new(0),
            home: AtomicUsize::new(0),
            content_lock: SleepLock::new("buffer"),
            data: UnsafeCell::new(vec![0u8; block_size].into_boxed_slice()),
        }
    }

    #[inline]
    pub fn id(&self) -> BufId {
        self.id
    }

    #[inline]
    pub fn dev(&self) -> DeviceId {
        self.dev.load(Ordering::Acquire)
    }

    #[inline]
    pub fn blockno(&self) -> BlockNo {
        self.blockno.load(Ordering::Acquire)
    }

    /// Returns true once the descriptor has been given a block identity
    #[inline]
    pub fn is_assigned(&self) -> bool {
        self.dev() != NO_DEVICE
    }

    #[inline]
    pub fn matches(&self, dev: DeviceId, blockno: BlockNo) -> bool {
        self.dev() == dev && self.blockno() == blockno
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    /// Returns true if no thread holds a claim (eviction candidate)
    #[inline]
    pub fn is_free(&self) -> bool {
        self.refcount() == 0
    }

    #[inline]
    pub fn timestamp(&self) -> Tick {
        self.timestamp.load(Ordering::Acquire)
    }

    #[inline]
    pub fn home(&self) -> usize {
        self.home.load(Ordering::Acquire)
    }

    pub(crate) fn set_home(&self, bucket: usize) {
        self.home.store(bucket, Ordering::Release);
    }

    /// Gives a free descriptor a new identity with one reference.
    /// Caller holds the home bucket lock.
    pub(crate) fn assign(&self, dev: DeviceId, blockno: BlockNo) {
        debug_assert!(self.is_free(), "assign of referenced {}", self.id);
        self.valid.store(false, Ordering::Release);
        self.dev.store(dev, Ordering::Release);
        self.blockno.store(blockno, Ordering::Release);
        self.refcnt.store(1, Ordering::Release);
    }

    /// Adds a reference and returns the previous count.
    /// Caller holds the home bucket lock.
    pub(crate) fn acquire_ref(&self) -> u32 {
        self.refcnt.fetch_add(1, Ordering::AcqRel)
    }

    /// Drops a reference and returns the new count, or `None` if the count
    /// was already zero. Caller holds the home bucket lock.
    pub(crate) fn drop_ref(&self) -> Option<u32> {
        let count = self.refcnt.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }
        self.refcnt.store(count - 1, Ordering::Release);
        Some(count - 1)
    }

    pub(crate) fn stamp(&self, tick: Tick) {
        self.timestamp.store(tick, Ordering::Release);
    }

    #[inline]
    pub(crate) fn content_lock(&self) -> &SleepLock {
        &self.content_lock
    }

    /// Payload of the buffer.
    ///
    /// # Safety
    /// The calling thread must hold `content_lock` for the lifetime of the
    /// returned slice.
    pub(crate) unsafe fn data(&self) -> &[u8] {
        unsafe { &*self.data.get() }
    }

    /// Mutable payload of the buffer.
    ///
    /// # Safety
    /// The calling thread must hold `content_lock` and no other reference to
    /// the payload may be live for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut [u8] {
        unsafe { &mut *self.data.get() }
    }
}

impl fmt::Debug for BufferDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDesc")
            .field("id", &self.id)
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .field("valid", &self.is_valid())
            .field("refcnt", &self.refcount())
            .field("timestamp", &self.timestamp())
            .field("home", &self.home())
            .finish()
    }
}
