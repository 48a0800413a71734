//! # Kernel
//!
//! Thread lifecycle, dispatching and the timer tick for DonOS.
//!
//! The kernel is a deterministic single-CPU state machine. An operation
//! that would block the calling thread (sleeping, joining, waiting for a
//! lock) parks it and switches [`Kernel::current`] to the next ready
//! thread before returning; saving and restoring registers is left to the
//! port that embeds the kernel. Every method enters a critical section, so
//! the kernel can be driven from thread context and from the timer
//! interrupt alike.
//!
//! ## Dispatching
//!
//! ```text
//! yield_now() / sleep() / finish() / timer_interrupt()
//!   └─► dispatch()
//!         └─► Scheduler::next_thread(ready queue)
//!               ├─► highest effective priority (donations included)
//!               ├─► FIFO among equals
//!               └─► nobody ready → CPU idles until the next tick
//! ```
//!
//! The ready queue does not transfer priority: running is not a resource
//! anybody waits behind. Join queues do.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use log::debug;

use crate::alarm::Alarm;
use crate::config::{Priority, MAX_THREADS, TIMER_INTERVAL};
use crate::error::{Error, Result};
use crate::queue::QueueId;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::thread::{ThreadControlBlock, ThreadId, ThreadStatus};

/// The boot thread, running when the kernel is created.
pub const MAIN_THREAD: ThreadId = ThreadId::new(0);

/// Result of an operation that may park the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation finished without blocking.
    Completed,
    /// The caller was parked; another thread (or nobody) now runs.
    Blocked,
}

// ---------------------------------------------------------------------------
// Kernel struct
// ---------------------------------------------------------------------------

/// Thread table, scheduler, ready queue and clock of one logical CPU.
#[derive(Debug)]
pub struct Kernel {
    scheduler: Scheduler,

    /// Fixed-size thread table. Slot 0 is the boot thread.
    threads: [ThreadControlBlock; MAX_THREADS],

    /// Non-donating queue of threads waiting for the CPU. The running
    /// thread is its holder.
    ready_queue: QueueId,

    /// Thread owning the CPU, `None` while idle.
    current: Option<ThreadId>,

    alarm: Alarm,

    /// Monotonic clock, advanced by `TIMER_INTERVAL` per timer interrupt.
    clock: u64,

    /// Number of times the CPU changed hands.
    context_switches: u64,
}

impl Kernel {
    /// Create a kernel whose boot thread ([`MAIN_THREAD`]) is running.
    ///
    /// # Errors
    /// [`Error::QueueTableFull`] if the ready queue cannot be allocated.
    pub fn new() -> Result<Self> {
        let mut scheduler = Scheduler::new();
        let mut threads: [ThreadControlBlock; MAX_THREADS] =
            core::array::from_fn(ThreadControlBlock::empty);
        threads[MAIN_THREAD.index()].init("main");
        threads[MAIN_THREAD.index()].status = ThreadStatus::Running;

        let ready_queue = sync::free(|cs| -> Result<QueueId> {
            let ready_queue = scheduler.new_queue(cs, false)?;
            scheduler.acquire(cs, ready_queue, MAIN_THREAD);
            Ok(ready_queue)
        })?;

        Ok(Self {
            scheduler,
            threads,
            ready_queue,
            current: Some(MAIN_THREAD),
            alarm: Alarm::new(),
            clock: 0,
            context_switches: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Thread owning the CPU, `None` while idle.
    #[inline]
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// The calling thread.
    ///
    /// # Panics
    /// If the CPU is idle: nothing can call into the kernel then.
    #[track_caller]
    pub fn current_thread(&self) -> ThreadId {
        match self.current {
            Some(thread) => thread,
            None => panic!("no thread is running"),
        }
    }

    /// Control block of a live thread, `None` once it has finished.
    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadControlBlock> {
        let tcb = &self.threads[thread.index()];
        tcb.is_live(thread).then_some(tcb)
    }

    /// Lifecycle status of `thread`. A finished thread stays `Finished`
    /// even after its slot has been reused.
    pub fn status(&self, thread: ThreadId) -> ThreadStatus {
        match self.thread(thread) {
            Some(tcb) => tcb.status,
            None => ThreadStatus::Finished,
        }
    }

    /// Read-only view of the scheduler: queue holders, waiters, and
    /// cached scheduling state.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Current clock value in ticks.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Number of times the CPU changed hands, idling included.
    #[inline]
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Threads waiting for the CPU, in arrival order.
    pub fn ready_threads(&self) -> &[ThreadId] {
        self.scheduler.waiters(self.ready_queue)
    }

    /// Clock value at which the next timed sleeper is due, if any.
    pub fn next_wake_time(&self) -> Option<u64> {
        self.alarm.next_wake_time()
    }

    /// Allocate a resource queue for a synchronization primitive.
    ///
    /// # Errors
    /// [`Error::QueueTableFull`] if every queue slot is live.
    pub fn new_queue(&mut self, transfers_priority: bool) -> Result<QueueId> {
        sync::free(|cs| self.scheduler.new_queue(cs, transfers_priority))
    }

    /// Free a queue allocated with [`Kernel::new_queue`].
    pub fn free_queue(&mut self, queue: QueueId) {
        sync::free(|cs| self.scheduler.free_queue(cs, queue))
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Base priority of a live thread.
    pub fn get_priority(&mut self, thread: ThreadId) -> Priority {
        self.assert_live(thread);
        sync::free(|cs| self.scheduler.get_priority(cs, thread))
    }

    /// Priority a live thread is scheduled at, donations included.
    pub fn get_effective_priority(&mut self, thread: ThreadId) -> Priority {
        self.assert_live(thread);
        sync::free(|cs| self.scheduler.get_effective_priority(cs, thread))
    }

    /// # Panics
    /// If `priority` is outside `[PRIORITY_MIN, PRIORITY_MAX]` or the
    /// thread has finished.
    pub fn set_priority(&mut self, thread: ThreadId, priority: Priority) {
        self.assert_live(thread);
        sync::free(|cs| self.scheduler.set_priority(cs, thread, priority))
    }

    /// Raise the calling thread's priority by one. Returns `false` at
    /// `PRIORITY_MAX` or while idle.
    pub fn increase_priority(&mut self) -> bool {
        match self.current {
            Some(thread) => sync::free(|cs| self.scheduler.increase_priority(cs, thread)),
            None => false,
        }
    }

    /// Lower the calling thread's priority by one. Returns `false` at
    /// `PRIORITY_MIN` or while idle.
    pub fn decrease_priority(&mut self) -> bool {
        match self.current {
            Some(thread) => sync::free(|cs| self.scheduler.decrease_priority(cs, thread)),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Create a thread at `priority` and make it ready.
    ///
    /// # Errors
    /// [`Error::ThreadTableFull`] if every slot holds a live thread.
    pub fn fork(&mut self, name: &str, priority: Priority) -> Result<ThreadId> {
        let slot = self
            .threads
            .iter()
            .position(|tcb| !tcb.active)
            .ok_or(Error::ThreadTableFull)?;
        self.threads[slot].init(name);
        let thread = self.threads[slot].id;
        debug!("fork {} '{}' at priority {}", thread, name, priority);

        sync::free(|cs| self.scheduler.set_priority(cs, thread, priority));
        self.ready(thread);
        Ok(thread)
    }

    /// Move a new or blocked thread onto the ready queue. A thread that
    /// was sleeping on the alarm no longer waits for its wake time. If the
    /// CPU is idle the best ready thread is dispatched at once.
    ///
    /// # Panics
    /// If the thread is running, already ready, or finished.
    pub fn ready(&mut self, thread: ThreadId) {
        sync::free(|cs| {
            self.enqueue_ready(cs, thread);
            if self.current.is_none() {
                self.dispatch(cs);
            }
        })
    }

    /// Give up the CPU, staying ready. Returns the thread now running,
    /// which is the caller again if nothing better is ready.
    pub fn yield_now(&mut self) -> Option<ThreadId> {
        let me = self.current_thread();
        self.threads[me.index()].status = ThreadStatus::Ready;
        let ready_queue = self.ready_queue;
        sync::free(|cs| {
            self.scheduler.wait_for_access(cs, ready_queue, me);
            self.dispatch(cs)
        })
    }

    /// Park the calling thread. Whoever arranged the wake-up calls
    /// [`Kernel::ready`] later.
    pub fn sleep(&mut self) -> Option<ThreadId> {
        let me = self.current_thread();
        self.threads[me.index()].status = ThreadStatus::Blocked;
        sync::free(|cs| self.dispatch(cs))
    }

    /// Terminate the calling thread, waking everybody joined on it. Its
    /// handle stays `Finished` for good; the slot goes to the next fork.
    ///
    /// # Panics
    /// If the thread still holds a lock or waits on a queue.
    pub fn finish(&mut self) -> Option<ThreadId> {
        let me = self.current_thread();
        debug!("{} finished", me);

        sync::free(|cs| {
            if let Some(join_queue) = self.threads[me.index()].join_queue.take() {
                while let Some(joiner) = self.scheduler.next_thread(cs, join_queue) {
                    self.enqueue_ready(cs, joiner);
                }
                self.scheduler.free_queue(cs, join_queue);
            }

            self.threads[me.index()].retire();
            let next = self.dispatch(cs);
            self.scheduler.retire_thread(cs, me);
            next
        })
    }

    /// Wait for `target` to finish.
    ///
    /// Joiners wait on a priority-transferring queue held by the target, so
    /// the target runs with at least the best joiner's priority.
    ///
    /// # Errors
    /// [`Error::QueueTableFull`] if the join queue cannot be created.
    ///
    /// # Panics
    /// If a thread joins itself.
    pub fn join(&mut self, target: ThreadId) -> Result<Outcome> {
        let me = self.current_thread();
        assert!(me != target, "{} cannot join itself", me);
        if self.thread(target).is_none() {
            return Ok(Outcome::Completed);
        }

        sync::free(|cs| -> Result<Outcome> {
            let join_queue = match self.threads[target.index()].join_queue {
                Some(queue) => queue,
                None => {
                    let queue = self.scheduler.new_queue(cs, true)?;
                    self.scheduler.acquire(cs, queue, target);
                    self.threads[target.index()].join_queue = Some(queue);
                    queue
                }
            };
            debug!("{} joins {}", me, target);
            self.scheduler.wait_for_access(cs, join_queue, me);
            self.sleep();
            Ok(Outcome::Blocked)
        })
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Park the calling thread for at least `ticks` clock ticks. It is made
    /// ready by the first timer interrupt at which `now() >= start + ticks`.
    ///
    /// # Errors
    /// [`Error::AlarmTableFull`] if the alarm cannot track another sleeper.
    pub fn wait_until(&mut self, ticks: u64) -> Result<()> {
        let me = self.current_thread();
        let wake_time = self.clock.saturating_add(ticks);
        sync::free(|_| -> Result<()> {
            self.alarm.schedule(wake_time, me)?;
            self.sleep();
            Ok(())
        })
    }

    /// The periodic timer interrupt.
    ///
    /// Advances the clock by `TIMER_INTERVAL`, wakes every sleeper that is
    /// due, and preempts the running thread (or leaves idle). Returns the
    /// thread running afterwards.
    pub fn timer_interrupt(&mut self) -> Option<ThreadId> {
        sync::free(|cs| {
            self.clock += TIMER_INTERVAL;
            while let Some(thread) = self.alarm.pop_expired(self.clock) {
                self.enqueue_ready(cs, thread);
            }
            match self.current {
                Some(_) => self.yield_now(),
                None => self.dispatch(cs),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Dispatching
    // -----------------------------------------------------------------------

    #[track_caller]
    fn assert_live(&self, thread: ThreadId) {
        assert!(
            self.threads[thread.index()].is_live(thread),
            "stale thread handle {}",
            thread
        );
    }

    /// Put a thread on the ready queue without dispatching.
    fn enqueue_ready(&mut self, cs: CriticalSection<'_>, thread: ThreadId) {
        let tcb = &mut self.threads[thread.index()];
        let waiting = matches!(tcb.status, ThreadStatus::New | ThreadStatus::Blocked);
        assert!(
            tcb.is_live(thread) && waiting,
            "{} cannot be made ready from {:?}",
            thread,
            tcb.status
        );
        tcb.status = ThreadStatus::Ready;
        self.alarm.cancel(thread);
        self.scheduler.wait_for_access(cs, self.ready_queue, thread);
    }

    /// Hand the CPU to the best ready thread. The previous thread's status
    /// must already say where it went.
    fn dispatch(&mut self, cs: CriticalSection<'_>) -> Option<ThreadId> {
        let previous = self.current;
        let next = self.scheduler.next_thread(cs, self.ready_queue);

        if let Some(thread) = next {
            self.threads[thread.index()].status = ThreadStatus::Running;
        }
        if next != previous {
            self.context_switches += 1;
            match next {
                Some(thread) => debug!("switch {:?} -> {}", previous, thread),
                None => debug!("{:?} leaves the CPU idle", previous),
            }
        }

        self.current = next;
        next
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// Global kernel, reachable from thread context and interrupt handlers.
static KERNEL: Mutex<RefCell<Option<Kernel>>> = Mutex::new(RefCell::new(None));

/// Initialize the global kernel, replacing any previous instance.
///
/// Must be called before any other global-kernel function.
pub fn init() -> Result<()> {
    let kernel = Kernel::new()?;
    sync::free(|cs| {
        KERNEL.borrow_ref_mut(cs).replace(kernel);
    });
    Ok(())
}

/// Run `f` on the global kernel inside a critical section.
///
/// # Panics
/// If [`init`] has not been called.
pub fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    sync::free(|cs| {
        let mut slot = KERNEL.borrow_ref_mut(cs);
        match slot.as_mut() {
            Some(kernel) => f(kernel),
            None => panic!("kernel not initialized"),
        }
    })
}

/// Voluntarily yield the CPU from the current thread.
pub fn yield_now() -> Option<ThreadId> {
    with(Kernel::yield_now)
}

/// Timer interrupt entry point for the port's tick handler.
pub fn timer_interrupt() -> Option<ThreadId> {
    with(Kernel::timer_interrupt)
}

/// Raise the current thread's priority by one.
pub fn increase_priority() -> bool {
    with(Kernel::increase_priority)
}

/// Lower the current thread's priority by one.
pub fn decrease_priority() -> bool {
    with(Kernel::decrease_priority)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
