//! # Resource Queue
//!
//! The waiting set guarding one exclusive resource. A queue keeps its
//! waiters in arrival order, remembers which thread currently holds the
//! resource, and, when created with `transfers_priority`, caches the highest
//! effective priority among its waiters so the holder can inherit it.
//!
//! Queues only store the local facts. Anything that crosses an edge of the
//! donation graph (recomputing, invalidating, linking a thread) is done by
//! the [`Scheduler`](crate::scheduler::Scheduler), which owns every queue
//! and every thread state.

use core::fmt;

use heapless::Vec;

use crate::config::{Priority, MAX_QUEUES, MAX_THREADS, PRIORITY_MIN};
use crate::thread::ThreadId;

// ---------------------------------------------------------------------------
// Queue identity
// ---------------------------------------------------------------------------

/// Handle of a resource queue: its slot in the scheduler's queue arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u8);

impl QueueId {
    /// Build a handle from a queue-arena slot.
    ///
    /// # Panics
    /// If `index >= MAX_QUEUES`.
    pub const fn new(index: usize) -> Self {
        assert!(index < MAX_QUEUES, "queue index out of range");
        QueueId(index as u8)
    }

    /// Slot of this queue in the arena.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Queue sets
// ---------------------------------------------------------------------------

/// A set of queues, one bit per queue slot.
///
/// Used for a thread's held and awaited queues. Iteration is in slot order,
/// which keeps recomputation deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSet(u64);

impl QueueSet {
    pub const EMPTY: QueueSet = QueueSet(0);

    /// Add `queue`. Adding a member again is a no-op.
    #[inline]
    pub fn insert(&mut self, queue: QueueId) {
        self.0 |= 1u64 << queue.index();
    }

    /// Remove `queue` if present.
    #[inline]
    pub fn remove(&mut self, queue: QueueId) {
        self.0 &= !(1u64 << queue.index());
    }

    /// Whether `queue` is a member.
    #[inline]
    pub fn contains(&self, queue: QueueId) -> bool {
        self.0 & (1u64 << queue.index()) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of member queues.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in slot order.
    pub fn iter(&self) -> QueueSetIter {
        QueueSetIter(self.0)
    }
}

impl IntoIterator for QueueSet {
    type Item = QueueId;
    type IntoIter = QueueSetIter;

    fn into_iter(self) -> QueueSetIter {
        QueueSetIter(self.0)
    }
}

/// Iterator over the members of a [`QueueSet`], lowest slot first.
#[derive(Debug, Clone)]
pub struct QueueSetIter(u64);

impl Iterator for QueueSetIter {
    type Item = QueueId;

    fn next(&mut self) -> Option<QueueId> {
        if self.0 == 0 {
            return None;
        }
        let slot = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(QueueId::new(slot))
    }
}

// ---------------------------------------------------------------------------
// Resource queue
// ---------------------------------------------------------------------------

/// One resource queue of the donation graph.
#[derive(Debug, Clone)]
pub struct ResourceQueue {
    transfers_priority: bool,
    wait_list: Vec<ThreadId, MAX_THREADS>,
    holder: Option<ThreadId>,
    effective: Priority,
    dirty: bool,
}

impl ResourceQueue {
    /// An empty, unheld queue. `transfers_priority` decides whether its
    /// waiters donate to the holder.
    pub const fn new(transfers_priority: bool) -> Self {
        Self {
            transfers_priority,
            wait_list: Vec::new(),
            holder: None,
            effective: PRIORITY_MIN,
            dirty: false,
        }
    }

    /// Whether waiters donate their priority to the holder.
    #[inline]
    pub fn transfers_priority(&self) -> bool {
        self.transfers_priority
    }

    /// Waiting threads in arrival order.
    #[inline]
    pub fn waiters(&self) -> &[ThreadId] {
        &self.wait_list
    }

    #[inline]
    pub fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    #[inline]
    pub fn is_waiting(&self, thread: ThreadId) -> bool {
        self.wait_list.contains(&thread)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn push_waiter(&mut self, thread: ThreadId) {
        if self.is_waiting(thread) {
            return;
        }
        // One slot per thread, and a thread appears at most once.
        let pushed = self.wait_list.push(thread);
        debug_assert!(pushed.is_ok());
    }

    /// Drop `thread` from the wait list. Returns whether it was there.
    pub(crate) fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        match self.wait_list.iter().position(|&t| t == thread) {
            Some(pos) => {
                self.wait_list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_holder(&mut self, holder: Option<ThreadId>) -> Option<ThreadId> {
        core::mem::replace(&mut self.holder, holder)
    }

    /// Cached effective priority, if it is still valid.
    #[inline]
    pub(crate) fn cached(&self) -> Option<Priority> {
        (!self.dirty).then_some(self.effective)
    }

    pub(crate) fn store(&mut self, effective: Priority) {
        self.effective = effective;
        self.dirty = false;
    }

    /// Mark the cache stale. Returns `false` if it was already stale or the
    /// queue never donates, i.e. when invalidation should stop here.
    pub(crate) fn mark_dirty(&mut self) -> bool {
        if !self.transfers_priority || self.dirty {
            return false;
        }
        self.dirty = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_set_membership() {
        let mut set = QueueSet::EMPTY;
        assert!(set.is_empty());

        set.insert(QueueId::new(0));
        set.insert(QueueId::new(63));
        set.insert(QueueId::new(5));
        assert_eq!(set.len(), 3);
        assert!(set.contains(QueueId::new(5)));

        set.remove(QueueId::new(5));
        assert!(!set.contains(QueueId::new(5)));
        set.remove(QueueId::new(5));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_queue_set_iterates_in_slot_order() {
        let mut set = QueueSet::EMPTY;
        for i in [40, 2, 17] {
            set.insert(QueueId::new(i));
        }
        let mut it = set.iter();
        assert_eq!(it.next(), Some(QueueId::new(2)));
        assert_eq!(it.next(), Some(QueueId::new(17)));
        assert_eq!(it.next(), Some(QueueId::new(40)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_wait_list_keeps_arrival_order() {
        let mut queue = ResourceQueue::new(true);
        queue.push_waiter(ThreadId::new(4));
        queue.push_waiter(ThreadId::new(1));
        queue.push_waiter(ThreadId::new(4));
        queue.push_waiter(ThreadId::new(9));
        assert_eq!(
            queue.waiters(),
            &[ThreadId::new(4), ThreadId::new(1), ThreadId::new(9)]
        );

        assert!(queue.remove_waiter(ThreadId::new(1)));
        assert!(!queue.remove_waiter(ThreadId::new(1)));
        assert_eq!(queue.waiters(), &[ThreadId::new(4), ThreadId::new(9)]);
    }

    #[test]
    fn test_non_donating_queue_never_dirty() {
        let mut queue = ResourceQueue::new(false);
        assert!(!queue.mark_dirty());
        assert!(!queue.is_dirty());
        assert_eq!(queue.cached(), Some(PRIORITY_MIN));
    }

    #[test]
    fn test_mark_dirty_short_circuits() {
        let mut queue = ResourceQueue::new(true);
        assert!(queue.mark_dirty());
        assert!(!queue.mark_dirty());
        assert_eq!(queue.cached(), None);

        queue.store(6);
        assert_eq!(queue.cached(), Some(6));
    }
}
