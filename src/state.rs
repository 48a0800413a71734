//! # Thread Scheduling State
//!
//! Per-thread scheduling record: base priority, the cached effective
//! priority with its dirty bit, and the queues the thread holds or waits on.
//! One record exists per thread, created the first time the scheduler sees
//! the thread.
//!
//! The bookkeeping methods here only touch the thread's own record; the
//! [`Scheduler`](crate::scheduler::Scheduler) pairs each of them with the
//! matching queue update and the invalidation that follows.

use crate::config::{Priority, PRIORITY_DEFAULT};
use crate::queue::{QueueId, QueueSet};

/// Scheduling state of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadState {
    priority: Priority,
    effective: Priority,
    dirty: bool,
    held: QueueSet,
    waiting_on: QueueSet,
}

impl ThreadState {
    /// A fresh state at the default priority, holding and awaiting nothing.
    pub const fn new() -> Self {
        Self {
            priority: PRIORITY_DEFAULT,
            effective: PRIORITY_DEFAULT,
            dirty: false,
            held: QueueSet::EMPTY,
            waiting_on: QueueSet::EMPTY,
        }
    }

    /// Base priority, ignoring donations.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Queues this thread currently owns.
    #[inline]
    pub fn held(&self) -> QueueSet {
        self.held
    }

    /// Queues this thread is blocked on.
    #[inline]
    pub fn waiting_on(&self) -> QueueSet {
        self.waiting_on
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// A thread with nothing held or awaited can be retired.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.held.is_empty() && self.waiting_on.is_empty()
    }

    /// Store a new base priority. Returns `false` if it was unchanged.
    pub(crate) fn set_priority(&mut self, priority: Priority) -> bool {
        if self.priority == priority {
            return false;
        }
        self.priority = priority;
        true
    }

    pub(crate) fn record_wait(&mut self, queue: QueueId) {
        self.waiting_on.insert(queue);
        self.held.remove(queue);
    }

    pub(crate) fn record_acquire(&mut self, queue: QueueId) {
        self.held.insert(queue);
        self.waiting_on.remove(queue);
    }

    pub(crate) fn record_release(&mut self, queue: QueueId) {
        self.held.remove(queue);
    }

    pub(crate) fn stop_waiting(&mut self, queue: QueueId) {
        self.waiting_on.remove(queue);
    }

    #[inline]
    pub(crate) fn cached(&self) -> Option<Priority> {
        (!self.dirty).then_some(self.effective)
    }

    pub(crate) fn store(&mut self, effective: Priority) {
        self.effective = effective;
        self.dirty = false;
    }

    /// Mark the cache stale. Returns `false` if it already was.
    pub(crate) fn mark_dirty(&mut self) -> bool {
        if self.dirty {
            return false;
        }
        self.dirty = true;
        true
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}
