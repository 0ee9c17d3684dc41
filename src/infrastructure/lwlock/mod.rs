// LWLock - Lightweight Lock implementations
// Short critical-section locks for cache metadata and the blocking,
// owner-tracked lock guarding buffer contents.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::thread::{self, ThreadId};

/// A trait that defines a unified interface for basic locks
pub trait LockInterface<T> {
    /// The guard type for exclusive locks
    type Guard<'a>
    where
        Self: 'a,
        T: 'a;

    /// Creates a new lock with the given initial value
    fn new(data: T) -> Self;

    /// Acquires an exclusive lock
    fn lock(&self) -> Self::Guard<'_>;
}

/// Named lock for short, non-suspending critical sections.
///
/// Holders must never block on I/O or on a `SleepLock` while holding it.
/// Backed by `parking_lot::Mutex`, which spins briefly before parking.
pub struct SpinLock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    pub fn new(data: T, name: &'static str) -> Self {
        SpinLock {
            name,
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Attempts the lock without waiting
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> LockInterface<T> for SpinLock<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        SpinLock::new(data, "spinlock")
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Error returned when a `SleepLock` is released by a thread that does not own it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotOwner {
    pub name: &'static str,
}

impl fmt::Display for NotOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sleep lock '{}' is not held by the calling thread", self.name)
    }
}

impl std::error::Error for NotOwner {}

/// Blocking exclusive lock that remembers its owner.
///
/// A contended `acquire` parks the calling thread on a condition variable
/// until the owner calls `release`. Unlike `SpinLock` this lock may be held
/// across disk I/O. It protects no data of its own; callers pair it with
/// the state it guards.
pub struct SleepLock {
    name: &'static str,
    owner: Mutex<Option<ThreadId>>,
    waiters: Condvar,
}

impl SleepLock {
    pub fn new(name: &'static str) -> Self {
        SleepLock {
            name,
            owner: Mutex::new(None),
            waiters: Condvar::new(),
        }
    }

    /// Acquires the lock, parking while another thread owns it.
    ///
    /// Not reentrant: a thread that already owns the lock waits forever.
    /// Use `holding` first when re-entry is possible.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        while owner.is_some() {
            self.waiters.wait(&mut owner);
        }
        *owner = Some(me);
    }

    /// Acquires the lock only if it is free
    pub fn try_acquire(&self) -> bool {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(thread::current().id());
        true
    }

    /// Releases the lock and wakes one waiter
    pub fn release(&self) -> Result<(), NotOwner> {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            return Err(NotOwner { name: self.name });
        }
        *owner = None;
        drop(owner);
        self.waiters.notify_one();
        Ok(())
    }

    /// Returns true if the calling thread owns the lock
    pub fn holding(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for SleepLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}
