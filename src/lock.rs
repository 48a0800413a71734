//! # Lock
//!
//! A blocking mutual-exclusion lock with priority donation.
//!
//! Waiters queue on a priority-transferring resource queue held by the
//! lock's owner, so a low-priority owner runs with the priority of its most
//! important waiter until it lets go. Release hands the lock straight to
//! the best waiter: by the time that thread runs again it already owns the
//! lock, and nobody can barge in between.

use log::trace;

use crate::error::Result;
use crate::kernel::{Kernel, Outcome};
use crate::queue::QueueId;
use crate::sync;
use crate::thread::ThreadId;

/// Blocking lock backed by a donating resource queue.
#[derive(Debug)]
pub struct Lock {
    queue: QueueId,
}

impl Lock {
    /// # Errors
    /// [`Error::QueueTableFull`](crate::Error::QueueTableFull) if no
    /// resource queue is left.
    pub fn new(kernel: &mut Kernel) -> Result<Self> {
        let queue = kernel.new_queue(true)?;
        Ok(Self { queue })
    }

    /// Acquire the lock for the calling thread.
    ///
    /// Returns [`Outcome::Completed`] if the lock was free. Otherwise the
    /// caller is parked and [`Outcome::Blocked`] is returned; the lock is
    /// handed to it before it runs again.
    ///
    /// # Panics
    /// If the caller already holds the lock.
    pub fn acquire(&self, kernel: &mut Kernel) -> Outcome {
        let me = kernel.current_thread();
        sync::free(|cs| {
            let scheduler = kernel.scheduler_mut();
            match scheduler.holder(self.queue) {
                None => {
                    scheduler.acquire(cs, self.queue, me);
                    trace!("{} took lock {}", me, self.queue);
                    Outcome::Completed
                }
                Some(holder) => {
                    assert!(holder != me, "{} already holds lock {}", me, self.queue);
                    scheduler.wait_for_access(cs, self.queue, me);
                    kernel.sleep();
                    Outcome::Blocked
                }
            }
        })
    }

    /// Release the lock, handing it to the best waiter if there is one.
    /// Returns the new owner.
    ///
    /// # Panics
    /// If the caller does not hold the lock.
    pub fn release(&self, kernel: &mut Kernel) -> Option<ThreadId> {
        assert!(
            self.is_held_by_current(kernel),
            "lock {} released by a thread that does not hold it",
            self.queue
        );
        sync::free(|cs| {
            let next = kernel.scheduler_mut().next_thread(cs, self.queue);
            if let Some(thread) = next {
                trace!("lock {} handed to {}", self.queue, thread);
                kernel.ready(thread);
            }
            next
        })
    }

    /// Current owner of the lock.
    pub fn holder(&self, kernel: &Kernel) -> Option<ThreadId> {
        kernel.scheduler().holder(self.queue)
    }

    /// Whether the running thread owns the lock.
    pub fn is_held_by_current(&self, kernel: &Kernel) -> bool {
        kernel.current().is_some() && self.holder(kernel) == kernel.current()
    }

    /// Threads blocked on the lock, in arrival order.
    pub fn waiters<'k>(&self, kernel: &'k Kernel) -> &'k [ThreadId] {
        kernel.scheduler().waiters(self.queue)
    }

    /// Queue `thread` for the lock without running it. Used to move a
    /// thread woken from a condition variable behind the current owner.
    pub(crate) fn enqueue(&self, kernel: &mut Kernel, thread: ThreadId) {
        sync::free(|cs| kernel.scheduler_mut().wait_for_access(cs, self.queue, thread));
    }

    /// Return the lock's queue to the kernel.
    ///
    /// # Panics
    /// If threads are still waiting for the lock.
    pub fn destroy(self, kernel: &mut Kernel) {
        kernel.free_queue(self.queue);
    }
}
