//! # Condition variable
//!
//! Mesa-style condition variable bound to a [`Lock`]. A sleeper gives up
//! the lock and parks on a non-donating queue; waking it moves it onto the
//! lock's wait list, so it resumes only once it owns the lock again.
//!
//! Sleepers are never granted the condition queue itself: the waker picks
//! the best one and cancels its wait. Nobody ever holds the queue, so a
//! woken thread does not linger as its holder.

use log::trace;

use crate::error::Result;
use crate::kernel::Kernel;
use crate::lock::Lock;
use crate::queue::QueueId;
use crate::sync;
use crate::thread::ThreadId;

/// Condition variable whose sleepers wait on a non-donating queue.
#[derive(Debug)]
pub struct Condition {
    sleepers: QueueId,
}

impl Condition {
    /// # Errors
    /// [`Error::QueueTableFull`](crate::Error::QueueTableFull) if no
    /// resource queue is left.
    pub fn new(kernel: &mut Kernel) -> Result<Self> {
        let sleepers = kernel.new_queue(false)?;
        Ok(Self { sleepers })
    }

    /// Release `lock` and park the caller until woken. The caller owns the
    /// lock again when it next runs. Returns the thread running now.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn sleep(&self, lock: &Lock, kernel: &mut Kernel) -> Option<ThreadId> {
        assert!(
            lock.is_held_by_current(kernel),
            "condition sleep without holding the lock"
        );
        let me = kernel.current_thread();
        sync::free(|cs| {
            kernel.scheduler_mut().wait_for_access(cs, self.sleepers, me);
            lock.release(kernel);
            kernel.sleep()
        })
    }

    /// Wake the best sleeper, if any. It queues for `lock` behind the
    /// caller.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn wake(&self, lock: &Lock, kernel: &mut Kernel) -> Option<ThreadId> {
        assert!(
            lock.is_held_by_current(kernel),
            "condition wake without holding the lock"
        );
        sync::free(|cs| {
            let scheduler = kernel.scheduler_mut();
            let thread = scheduler.pick_next_thread(cs, self.sleepers)?;
            scheduler.cancel_wait(cs, self.sleepers, thread);
            trace!("{} woken from {}", thread, self.sleepers);
            lock.enqueue(kernel, thread);
            Some(thread)
        })
    }

    /// Wake every sleeper. Returns how many were woken.
    pub fn wake_all(&self, lock: &Lock, kernel: &mut Kernel) -> usize {
        let mut woken = 0;
        while self.wake(lock, kernel).is_some() {
            woken += 1;
        }
        woken
    }

    /// Threads sleeping on the condition, in arrival order.
    pub fn sleepers<'k>(&self, kernel: &'k Kernel) -> &'k [ThreadId] {
        kernel.scheduler().waiters(self.sleepers)
    }

    /// # Panics
    /// If threads are still sleeping on the condition.
    pub fn destroy(self, kernel: &mut Kernel) {
        kernel.free_queue(self.sleepers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Outcome, MAIN_THREAD};
    use crate::thread::ThreadStatus;

    #[test]
    fn test_sleep_wake_reacquires_lock() {
        let mut k = Kernel::new().unwrap();
        let lock = Lock::new(&mut k).unwrap();
        let cond = Condition::new(&mut k).unwrap();
        let waiter = k.fork("waiter", 5).unwrap();

        assert_eq!(k.yield_now(), Some(waiter));
        assert_eq!(lock.acquire(&mut k), Outcome::Completed);
        assert_eq!(cond.sleep(&lock, &mut k), Some(MAIN_THREAD));
        assert_eq!(lock.holder(&k), None);
        assert_eq!(cond.sleepers(&k), &[waiter]);

        assert_eq!(lock.acquire(&mut k), Outcome::Completed);
        assert_eq!(cond.wake(&lock, &mut k), Some(waiter));
        assert!(cond.sleepers(&k).is_empty());
        assert_eq!(lock.waiters(&k), &[waiter]);
        assert_eq!(k.status(waiter), ThreadStatus::Blocked);
        // Queued on the lock, the waiter donates to the owner.
        assert_eq!(k.get_effective_priority(MAIN_THREAD), 5);

        assert_eq!(lock.release(&mut k), Some(waiter));
        assert_eq!(k.yield_now(), Some(waiter));
        assert!(lock.is_held_by_current(&k));
    }

    #[test]
    fn test_sleepers_do_not_donate() {
        let mut k = Kernel::new().unwrap();
        let lock = Lock::new(&mut k).unwrap();
        let cond = Condition::new(&mut k).unwrap();
        let waiter = k.fork("waiter", 6).unwrap();

        k.yield_now();
        lock.acquire(&mut k);
        cond.sleep(&lock, &mut k);

        lock.acquire(&mut k);
        assert_eq!(k.get_effective_priority(MAIN_THREAD), 1);
        assert_eq!(k.get_effective_priority(waiter), 6);
    }

    #[test]
    fn test_wake_empty() {
        let mut k = Kernel::new().unwrap();
        let lock = Lock::new(&mut k).unwrap();
        let cond = Condition::new(&mut k).unwrap();
        lock.acquire(&mut k);
        assert_eq!(cond.wake(&lock, &mut k), None);
        assert_eq!(cond.wake_all(&lock, &mut k), 0);
    }

    #[test]
    fn test_wake_all_in_priority_order() {
        let mut k = Kernel::new().unwrap();
        let lock = Lock::new(&mut k).unwrap();
        let cond = Condition::new(&mut k).unwrap();
        let early = k.fork("early", 4).unwrap();
        let late = k.fork("late", 2).unwrap();
        k.set_priority(MAIN_THREAD, 0);

        assert_eq!(k.yield_now(), Some(early));
        lock.acquire(&mut k);
        assert_eq!(cond.sleep(&lock, &mut k), Some(late));
        lock.acquire(&mut k);
        assert_eq!(cond.sleep(&lock, &mut k), Some(MAIN_THREAD));
        assert_eq!(cond.sleepers(&k), &[early, late]);

        // The later sleeper now outranks the earlier one.
        k.set_priority(late, 6);
        lock.acquire(&mut k);
        assert_eq!(cond.wake(&lock, &mut k), Some(late));
        assert_eq!(cond.wake_all(&lock, &mut k), 1);
        assert_eq!(lock.waiters(&k), &[late, early]);

        assert_eq!(lock.release(&mut k), Some(late));
        assert_eq!(k.yield_now(), Some(late));
        assert_eq!(lock.release(&mut k), Some(early));
    }

    #[test]
    #[should_panic(expected = "without holding the lock")]
    fn test_sleep_without_lock_panics() {
        let mut k = Kernel::new().unwrap();
        let lock = Lock::new(&mut k).unwrap();
        let cond = Condition::new(&mut k).unwrap();
        cond.sleep(&lock, &mut k);
    }
}
