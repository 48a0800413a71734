//! # Scheduler
//!
//! The policy object of DonOS. It owns every resource queue and every
//! thread scheduling state, and implements the operations that link them
//! into the donation graph.
//!
//! ## Dequeue Policy
//!
//! `next_thread` hands a queue to the waiter with the highest *effective*
//! priority. Among waiters of equal effective priority the one that has
//! waited longest wins, so equal-priority threads are served round-robin and
//! none of them starves.
//!
//! ## Locking
//!
//! None. Every operation that touches the graph takes the
//! [`CriticalSection`] token handed out by [`sync::free`](crate::sync::free)
//! (or by an [`InterruptState`](crate::sync::InterruptState)), so the section
//! that serializes access is checked at compile time. The scheduler must be
//! driven from a single logical CPU.
//!
//! ```
//! use donos::scheduler::Scheduler;
//! use donos::sync;
//! use donos::thread::ThreadId;
//!
//! let mut scheduler = Scheduler::new();
//! sync::free(|cs| scheduler.set_priority(cs, ThreadId::new(1), 5));
//! ```
//!
//! Outside a section there is no token, and the call does not compile:
//!
//! ```compile_fail
//! use donos::scheduler::Scheduler;
//! use donos::thread::ThreadId;
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.set_priority(ThreadId::new(1), 5);
//! ```

use critical_section::CriticalSection;
use log::trace;

use crate::config::{Priority, MAX_QUEUES, MAX_THREADS, PRIORITY_MAX, PRIORITY_MIN};
use crate::donation::GraphNode;
use crate::error::{Error, Result};
use crate::queue::{QueueId, ResourceQueue};
use crate::state::ThreadState;
use crate::thread::ThreadId;

const NO_THREAD: Option<ThreadState> = None;
const NO_QUEUE: Option<ResourceQueue> = None;

/// Priority-donating scheduler: arenas of thread states and resource queues.
#[derive(Debug)]
pub struct Scheduler {
    /// Scheduling state per thread-table slot, created on first contact.
    threads: [Option<ThreadState>; MAX_THREADS],
    /// Live resource queues.
    queues: [Option<ResourceQueue>; MAX_QUEUES],
}

impl Scheduler {
    /// A scheduler with no queues and no thread states.
    pub const fn new() -> Self {
        Self {
            threads: [NO_THREAD; MAX_THREADS],
            queues: [NO_QUEUE; MAX_QUEUES],
        }
    }

    // -----------------------------------------------------------------------
    // Arena access
    // -----------------------------------------------------------------------

    /// Allocate a new resource queue.
    ///
    /// If `transfers_priority` is set, the queue's waiters donate their
    /// effective priority to whichever thread holds it.
    ///
    /// # Errors
    /// [`Error::QueueTableFull`] when all `MAX_QUEUES` slots are live.
    pub fn new_queue(
        &mut self,
        _cs: CriticalSection<'_>,
        transfers_priority: bool,
    ) -> Result<QueueId> {
        let slot = self
            .queues
            .iter()
            .position(Option::is_none)
            .ok_or(Error::QueueTableFull)?;
        self.queues[slot] = Some(ResourceQueue::new(transfers_priority));
        let id = QueueId::new(slot);
        trace!("new queue {} (transfers_priority={})", id, transfers_priority);
        Ok(id)
    }

    /// Free a queue slot. The resource is released first if still held.
    ///
    /// # Panics
    /// If threads are still waiting on the queue.
    pub fn free_queue(&mut self, cs: CriticalSection<'_>, queue: QueueId) {
        assert!(
            self.queue(queue).waiters().is_empty(),
            "freeing queue {} with waiters",
            queue
        );
        self.release(cs, queue);
        self.queues[queue.index()] = None;
        trace!("freed queue {}", queue);
    }

    /// Read-only view of a queue.
    ///
    /// # Panics
    /// If `queue` does not name a live queue.
    #[track_caller]
    pub fn queue(&self, queue: QueueId) -> &ResourceQueue {
        match &self.queues[queue.index()] {
            Some(q) => q,
            None => panic!("stale queue handle {}", queue),
        }
    }

    #[track_caller]
    pub(crate) fn queue_mut(&mut self, queue: QueueId) -> &mut ResourceQueue {
        match &mut self.queues[queue.index()] {
            Some(q) => q,
            None => panic!("stale queue handle {}", queue),
        }
    }

    /// Scheduling state of `thread`, created at the default priority on
    /// first contact.
    pub fn thread_state(&mut self, _cs: CriticalSection<'_>, thread: ThreadId) -> &ThreadState {
        self.state_mut(thread)
    }

    pub(crate) fn state_mut(&mut self, thread: ThreadId) -> &mut ThreadState {
        self.threads[thread.index()].get_or_insert_with(ThreadState::new)
    }

    /// Drop the scheduling state of a thread that has exited.
    ///
    /// # Panics
    /// If the thread still holds or waits on a queue.
    pub fn retire_thread(&mut self, _cs: CriticalSection<'_>, thread: ThreadId) {
        if let Some(state) = &self.threads[thread.index()] {
            assert!(
                state.is_detached(),
                "retiring {} while it holds or waits on a queue",
                thread
            );
        }
        self.threads[thread.index()] = None;
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Base priority of `thread`.
    pub fn get_priority(&mut self, _cs: CriticalSection<'_>, thread: ThreadId) -> Priority {
        self.state_mut(thread).priority()
    }

    /// Base priority of `thread` raised by everything donated to it.
    pub fn get_effective_priority(
        &mut self,
        _cs: CriticalSection<'_>,
        thread: ThreadId,
    ) -> Priority {
        self.thread_effective(thread)
    }

    /// Effective priority a queue donates to its holder.
    pub fn get_queue_effective_priority(
        &mut self,
        _cs: CriticalSection<'_>,
        queue: QueueId,
    ) -> Priority {
        self.queue_effective(queue)
    }

    /// Set the base priority of `thread`.
    ///
    /// # Panics
    /// If `priority` is outside `[PRIORITY_MIN, PRIORITY_MAX]`.
    pub fn set_priority(&mut self, cs: CriticalSection<'_>, thread: ThreadId, priority: Priority) {
        assert!(
            (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );
        if self.state_mut(thread).set_priority(priority) {
            trace!("{} base priority -> {}", thread, priority);
            self.invalidate(cs, GraphNode::Thread(thread));
        }
    }

    /// Raise the base priority of `thread` by one. Returns `false`, changing
    /// nothing, if it is already `PRIORITY_MAX`.
    pub fn increase_priority(&mut self, cs: CriticalSection<'_>, thread: ThreadId) -> bool {
        let priority = self.get_priority(cs, thread);
        if priority == PRIORITY_MAX {
            return false;
        }
        self.set_priority(cs, thread, priority + 1);
        true
    }

    /// Lower the base priority of `thread` by one. Returns `false`, changing
    /// nothing, if it is already `PRIORITY_MIN`.
    pub fn decrease_priority(&mut self, cs: CriticalSection<'_>, thread: ThreadId) -> bool {
        let priority = self.get_priority(cs, thread);
        if priority == PRIORITY_MIN {
            return false;
        }
        self.set_priority(cs, thread, priority - 1);
        true
    }

    // -----------------------------------------------------------------------
    // Queue operations
    // -----------------------------------------------------------------------

    /// Record that `thread` is waiting for the resource behind `queue`.
    ///
    /// The thread joins the back of the wait list. If it was the holder it
    /// gives the resource up first: a thread never holds and waits on the
    /// same queue.
    pub fn wait_for_access(&mut self, cs: CriticalSection<'_>, queue: QueueId, thread: ThreadId) {
        trace!("{} waits for {}", thread, queue);

        let q = self.queue_mut(queue);
        q.push_waiter(thread);
        let was_holder = q.holder() == Some(thread);
        if was_holder {
            q.set_holder(None);
        }

        self.state_mut(thread).record_wait(queue);
        if was_holder {
            self.invalidate(cs, GraphNode::Thread(thread));
        }
        self.invalidate(cs, GraphNode::Queue(queue));
    }

    /// Grant `thread` the resource behind `queue`, bypassing the wait list.
    ///
    /// The previous holder, if any, is released first. If `thread` was
    /// queued it leaves the wait list.
    pub fn acquire(&mut self, cs: CriticalSection<'_>, queue: QueueId, thread: ThreadId) {
        trace!("{} acquires {}", thread, queue);

        let q = self.queue_mut(queue);
        let dequeued = q.remove_waiter(thread);
        let previous = q.set_holder(Some(thread));

        if let Some(prev) = previous.filter(|&prev| prev != thread) {
            self.state_mut(prev).record_release(queue);
            self.invalidate(cs, GraphNode::Thread(prev));
        }

        self.state_mut(thread).record_acquire(queue);
        if dequeued {
            self.invalidate(cs, GraphNode::Queue(queue));
        }
        self.invalidate(cs, GraphNode::Thread(thread));
    }

    /// Give up the resource behind `queue`. Returns the former holder.
    pub fn release(&mut self, cs: CriticalSection<'_>, queue: QueueId) -> Option<ThreadId> {
        let previous = self.queue_mut(queue).set_holder(None);
        if let Some(prev) = previous {
            trace!("{} releases {}", prev, queue);
            self.state_mut(prev).record_release(queue);
            self.invalidate(cs, GraphNode::Thread(prev));
        }
        previous
    }

    /// Remove `thread` from the wait list of `queue` without granting it
    /// anything. Returns whether it was waiting.
    pub fn cancel_wait(
        &mut self,
        cs: CriticalSection<'_>,
        queue: QueueId,
        thread: ThreadId,
    ) -> bool {
        if !self.queue_mut(queue).remove_waiter(thread) {
            return false;
        }
        self.state_mut(thread).stop_waiting(queue);
        self.invalidate(cs, GraphNode::Queue(queue));
        true
    }

    /// Dequeue the best waiter and make it the holder.
    ///
    /// Returns `None` when nobody is waiting; the resource is then free and
    /// the previous holder is released.
    pub fn next_thread(&mut self, cs: CriticalSection<'_>, queue: QueueId) -> Option<ThreadId> {
        match self.pick_next_thread(cs, queue) {
            Some(next) => {
                self.acquire(cs, queue, next);
                Some(next)
            }
            None => {
                self.release(cs, queue);
                None
            }
        }
    }

    /// The waiter `next_thread` would return, without dequeuing it.
    ///
    /// Highest effective priority wins; ties go to the earliest arrival.
    pub fn pick_next_thread(
        &mut self,
        _cs: CriticalSection<'_>,
        queue: QueueId,
    ) -> Option<ThreadId> {
        let mut best: Option<(ThreadId, Priority)> = None;

        let count = self.queue(queue).waiters().len();
        for i in 0..count {
            let thread = self.queue(queue).waiters()[i];
            let priority = self.thread_effective(thread);
            if best.map_or(true, |(_, best_priority)| priority > best_priority) {
                best = Some((thread, priority));
            }
        }

        best.map(|(thread, _)| thread)
    }

    /// Current holder of `queue`.
    pub fn holder(&self, queue: QueueId) -> Option<ThreadId> {
        self.queue(queue).holder()
    }

    /// Waiters of `queue` in arrival order.
    pub fn waiters(&self, queue: QueueId) -> &[ThreadId] {
        self.queue(queue).waiters()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync;
    use crate::config::PRIORITY_DEFAULT;

    fn t(i: usize) -> ThreadId {
        ThreadId::new(i)
    }

    fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler, CriticalSection<'_>) -> R) -> R {
        let mut sched = Scheduler::new();
        sync::free(|cs| f(&mut sched, cs))
    }

    #[test]
    fn test_state_created_lazily_at_default() {
        with_scheduler(|s, cs| {
            assert_eq!(s.get_priority(cs, t(4)), PRIORITY_DEFAULT);
            assert_eq!(s.get_effective_priority(cs, t(4)), PRIORITY_DEFAULT);
            assert!(s.thread_state(cs, t(4)).is_detached());
        });
    }

    #[test]
    fn test_set_priority_same_value_is_noop() {
        with_scheduler(|s, cs| {
            s.set_priority(cs, t(0), 4);
            let before = *s.thread_state(cs, t(0));
            s.set_priority(cs, t(0), 4);
            assert_eq!(*s.thread_state(cs, t(0)), before);
        });
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_priority_out_of_range_panics() {
        with_scheduler(|s, cs| s.set_priority(cs, t(0), PRIORITY_MAX + 1));
    }

    #[test]
    fn test_increase_at_max_fails() {
        with_scheduler(|s, cs| {
            s.set_priority(cs, t(1), PRIORITY_MAX - 1);
            assert!(s.increase_priority(cs, t(1)));
            assert_eq!(s.get_priority(cs, t(1)), PRIORITY_MAX);
            assert!(!s.increase_priority(cs, t(1)));
            assert_eq!(s.get_priority(cs, t(1)), PRIORITY_MAX);
        });
    }

    #[test]
    fn test_decrease_at_min_fails() {
        with_scheduler(|s, cs| {
            s.set_priority(cs, t(1), PRIORITY_MIN + 1);
            assert!(s.decrease_priority(cs, t(1)));
            assert_eq!(s.get_priority(cs, t(1)), PRIORITY_MIN);
            assert!(!s.decrease_priority(cs, t(1)));
            assert_eq!(s.get_priority(cs, t(1)), PRIORITY_MIN);
        });
    }

    #[test]
    fn test_queue_table_exhaustion() {
        with_scheduler(|s, cs| {
            for _ in 0..MAX_QUEUES {
                s.new_queue(cs, true).unwrap();
            }
            assert_eq!(s.new_queue(cs, false), Err(Error::QueueTableFull));

            s.free_queue(cs, QueueId::new(7));
            assert_eq!(s.new_queue(cs, false), Ok(QueueId::new(7)));
        });
    }

    #[test]
    fn test_next_thread_on_empty_queue() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            assert_eq!(s.pick_next_thread(cs, q), None);
            assert_eq!(s.next_thread(cs, q), None);
            assert_eq!(s.holder(q), None);
        });
    }

    #[test]
    fn test_pick_does_not_mutate() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.wait_for_access(cs, q, t(1));
            s.wait_for_access(cs, q, t(2));
            assert_eq!(s.pick_next_thread(cs, q), Some(t(1)));
            assert_eq!(s.pick_next_thread(cs, q), Some(t(1)));
            assert_eq!(s.waiters(q), &[t(1), t(2)]);
            assert_eq!(s.holder(q), None);
        });
    }

    #[test]
    fn test_equal_priorities_dequeue_fifo() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            let order = [t(5), t(2), t(9), t(0), t(7)];
            for &thread in &order {
                s.set_priority(cs, thread, 3);
                s.wait_for_access(cs, q, thread);
            }
            for &expected in &order {
                assert_eq!(s.next_thread(cs, q), Some(expected));
                assert_eq!(s.holder(q), Some(expected));
            }
            assert_eq!(s.next_thread(cs, q), None);
        });
    }

    #[test]
    fn test_non_donating_queue_orders_by_priority() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, false).unwrap();
            s.set_priority(cs, t(1), 2);
            s.set_priority(cs, t(2), 6);
            s.set_priority(cs, t(3), 6);
            s.wait_for_access(cs, q, t(1));
            s.wait_for_access(cs, q, t(2));
            s.wait_for_access(cs, q, t(3));
            assert_eq!(s.next_thread(cs, q), Some(t(2)));
            assert_eq!(s.next_thread(cs, q), Some(t(3)));
            assert_eq!(s.next_thread(cs, q), Some(t(1)));
        });
    }

    #[test]
    fn test_end_to_end_handoff() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(0));
            s.set_priority(cs, t(1), 3);
            s.set_priority(cs, t(2), 5);
            s.wait_for_access(cs, q, t(1));
            s.wait_for_access(cs, q, t(2));

            assert_eq!(s.get_effective_priority(cs, t(0)), 5);
            assert_eq!(s.pick_next_thread(cs, q), Some(t(2)));

            assert_eq!(s.next_thread(cs, q), Some(t(2)));
            assert_eq!(s.holder(q), Some(t(2)));
            assert_eq!(s.get_effective_priority(cs, t(0)), PRIORITY_DEFAULT);
            assert_eq!(s.get_effective_priority(cs, t(2)), 5);
            assert_eq!(s.pick_next_thread(cs, q), Some(t(1)));

            // T2 releases: the resource goes to T1.
            assert_eq!(s.next_thread(cs, q), Some(t(1)));
            assert!(!s.thread_state(cs, t(2)).held().contains(q));
            assert_eq!(s.get_effective_priority(cs, t(1)), 3);

            // T1 releases with nobody waiting: the resource is free.
            assert_eq!(s.next_thread(cs, q), None);
            assert_eq!(s.holder(q), None);
            assert!(s.thread_state(cs, t(1)).is_detached());
        });
    }

    #[test]
    fn test_acquire_bypasses_wait_list() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(0));
            s.set_priority(cs, t(3), 6);
            s.wait_for_access(cs, q, t(3));
            s.wait_for_access(cs, q, t(4));

            s.acquire(cs, q, t(4));
            assert_eq!(s.holder(q), Some(t(4)));
            assert_eq!(s.waiters(q), &[t(3)]);
            assert!(s.thread_state(cs, t(0)).is_detached());
            assert!(!s.thread_state(cs, t(4)).waiting_on().contains(q));
            assert_eq!(s.get_effective_priority(cs, t(4)), 6);
        });
    }

    #[test]
    fn test_holder_waiting_on_own_queue_gives_it_up() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(1));
            s.set_priority(cs, t(2), 7);
            s.wait_for_access(cs, q, t(2));
            assert_eq!(s.get_effective_priority(cs, t(1)), 7);

            s.wait_for_access(cs, q, t(1));
            assert_eq!(s.holder(q), None);
            assert!(!s.thread_state(cs, t(1)).held().contains(q));
            assert_eq!(s.get_effective_priority(cs, t(1)), PRIORITY_DEFAULT);
            assert_eq!(s.next_thread(cs, q), Some(t(2)));
        });
    }

    #[test]
    fn test_cancel_wait_withdraws_donation() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(0));
            s.set_priority(cs, t(1), 6);
            s.wait_for_access(cs, q, t(1));
            assert_eq!(s.get_effective_priority(cs, t(0)), 6);

            assert!(s.cancel_wait(cs, q, t(1)));
            assert!(!s.cancel_wait(cs, q, t(1)));
            assert_eq!(s.get_effective_priority(cs, t(0)), PRIORITY_DEFAULT);
            assert!(s.thread_state(cs, t(1)).is_detached());
        });
    }

    #[test]
    fn test_free_queue_releases_holder() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(3));
            s.free_queue(cs, q);
            assert!(s.thread_state(cs, t(3)).is_detached());
        });
    }

    #[test]
    #[should_panic(expected = "with waiters")]
    fn test_free_queue_with_waiters_panics() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.wait_for_access(cs, q, t(3));
            s.free_queue(cs, q);
        });
    }

    #[test]
    #[should_panic(expected = "stale queue handle")]
    fn test_stale_queue_handle_panics() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.free_queue(cs, q);
            s.wait_for_access(cs, q, t(0));
        });
    }

    #[test]
    fn test_retire_thread_resets_state() {
        with_scheduler(|s, cs| {
            s.set_priority(cs, t(2), 6);
            s.retire_thread(cs, t(2));
            assert_eq!(s.get_priority(cs, t(2)), PRIORITY_DEFAULT);
        });
    }

    #[test]
    #[should_panic(expected = "retiring")]
    fn test_retire_attached_thread_panics() {
        with_scheduler(|s, cs| {
            let q = s.new_queue(cs, true).unwrap();
            s.acquire(cs, q, t(2));
            s.retire_thread(cs, t(2));
        });
    }
}
