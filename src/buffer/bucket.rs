//! Hash buckets of the buffer cache.
//!
//! Every descriptor is linked into exactly one bucket. A bucket keeps its
//! members in recency order, most recently linked first.

use std::collections::VecDeque;

use parking_lot::MutexGuard;

use super::desc::BufId;
use crate::infrastructure::lwlock::SpinLock;

/// Ordered membership list of one bucket
#[derive(Debug, Default)]
pub(crate) struct RecencyList {
    members: VecDeque<BufId>,
}

impl RecencyList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Links `id` at the most-recent end
    pub(crate) fn push_front(&mut self, id: BufId) {
        debug_assert!(!self.contains(id), "{id} linked twice");
        self.members.push_front(id);
    }

    /// Unlinks `id`, returning false if it was not a member
    pub(crate) fn remove(&mut self, id: BufId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Moves a member to the most-recent end
    pub(crate) fn move_to_front(&mut self, id: BufId) {
        if self.remove(id) {
            self.members.push_front(id);
        }
    }

    pub(crate) fn contains(&self, id: BufId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: BufId) -> Option<usize> {
        self.members.iter().position(|&m| m == id)
    }

    /// Members, most recent first
    pub(crate) fn iter(&self) -> impl Iterator<Item = BufId> + '_ {
        self.members.iter().copied()
    }
}

/// One bucket: a spin lock around its membership list
pub(crate) struct Bucket {
    list: SpinLock<RecencyList>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Bucket {
            list: SpinLock::new(RecencyList::new(), "bcache.bucket"),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, RecencyList> {
        self.list.lock()
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, RecencyList>> {
        self.list.try_lock()
    }
}
