//! # Thread Control Block
//!
//! Defines the thread model of the DonOS kernel. Each thread has an identity
//! that the scheduler keys its lazily created scheduling state on, a
//! lifecycle status, and (once somebody joins it) a join queue through which
//! joiners donate their priority to it.

use core::fmt;

use heapless::String;

use crate::config::{MAX_THREADS, THREAD_NAME_LEN};
use crate::queue::QueueId;

// ---------------------------------------------------------------------------
// Thread identity
// ---------------------------------------------------------------------------

/// Handle of a kernel thread.
///
/// A handle names a thread-table slot and the generation of the thread
/// living in it. Slots are reused once a thread finishes; the generation
/// moves on at that point, so a handle kept past `finish` never aliases
/// the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    index: u8,
    generation: u16,
}

impl ThreadId {
    /// Handle of the first thread to occupy table slot `index`.
    ///
    /// # Panics
    /// If `index >= MAX_THREADS`.
    pub const fn new(index: usize) -> Self {
        assert!(index < MAX_THREADS, "thread index out of range");
        ThreadId {
            index: index as u8,
            generation: 0,
        }
    }

    /// Index of this thread in the thread table.
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// How many threads occupied the slot before this one.
    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }

    /// Handle for the next occupant of the same slot.
    pub(crate) const fn next_generation(self) -> Self {
        ThreadId {
            index: self.index,
            generation: self.generation.wrapping_add(1),
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation {
            0 => write!(f, "T{}", self.index),
            generation => write!(f, "T{}#{}", self.index, generation),
        }
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Lifecycle status of a thread.
///
/// ```text
///   ┌─────┐  fork()  ┌──────────┐  dispatch  ┌─────────┐
///   │ New │ ───────► │  Ready   │ ─────────► │ Running │
///   └─────┘          └──────────┘            └─────────┘
///                      ▲     ▲     yield        │   │
///                      │     └──────────────────┘   │ sleep()
///                      │        ready()        ┌────▼────┐
///                      └────────────────────── │ Blocked │
///                                              └─────────┘
///   Running ── finish() ──► Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Allocated but never made ready.
    New,
    /// Waiting on the ready queue for the CPU.
    Ready,
    /// Currently owns the CPU.
    Running,
    /// Parked on a lock, condition, alarm, join or channel.
    Blocked,
    /// Ran to completion; its slot may be reused.
    Finished,
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block (TCB): kernel-side bookkeeping for one thread.
///
/// TCBs are stored in a fixed-size table inside the kernel. Scheduling
/// state (priorities, held and awaited queues) lives in the scheduler's
/// own arena, keyed by the same [`ThreadId`].
#[derive(Debug, Clone)]
pub struct ThreadControlBlock {
    /// Unique thread identifier (index in the kernel's thread table).
    pub id: ThreadId,

    /// Human-readable name, truncated to `THREAD_NAME_LEN` bytes.
    pub name: String<THREAD_NAME_LEN>,

    /// Current lifecycle status.
    pub status: ThreadStatus,

    /// Queue joiners wait on. Created on the first `join`, held by this
    /// thread and donating to it until it finishes.
    pub join_queue: Option<QueueId>,

    /// Whether this slot is allocated (true) or free (false).
    pub active: bool,
}

impl ThreadControlBlock {
    /// Create an empty (unallocated) TCB for table slot `index`.
    pub const fn empty(index: usize) -> Self {
        Self {
            id: ThreadId::new(index),
            name: String::new(),
            status: ThreadStatus::Finished,
            join_queue: None,
            active: false,
        }
    }

    /// Initialize this slot for a new thread.
    pub fn init(&mut self, name: &str) {
        self.name.clear();
        for ch in name.chars() {
            if self.name.push(ch).is_err() {
                break;
            }
        }
        self.status = ThreadStatus::New;
        self.join_queue = None;
        self.active = true;
    }

    /// Mark the thread finished and free the slot. The slot's next occupant
    /// gets a fresh handle.
    pub fn retire(&mut self) {
        self.status = ThreadStatus::Finished;
        self.active = false;
        self.join_queue = None;
        self.id = self.id.next_generation();
    }

    /// Whether `thread` names the live occupant of this slot.
    #[inline]
    pub fn is_live(&self, thread: ThreadId) -> bool {
        self.active && self.id == thread
    }

    /// Check if this thread is waiting for the CPU.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.active && self.status == ThreadStatus::Ready
    }

    /// Check if this thread has run to completion.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status == ThreadStatus::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = ThreadControlBlock::empty(3);
        assert!(!tcb.active);
        assert_eq!(tcb.id, ThreadId::new(3));

        tcb.init("worker");
        assert!(tcb.active);
        assert_eq!(tcb.status, ThreadStatus::New);
        assert_eq!(tcb.name.as_str(), "worker");
        assert!(tcb.join_queue.is_none());
        assert!(!tcb.is_ready());
    }

    #[test]
    fn test_long_name_truncated() {
        let mut tcb = ThreadControlBlock::empty(0);
        tcb.init("a-thread-name-well-past-the-limit");
        assert_eq!(tcb.name.len(), THREAD_NAME_LEN);
        assert_eq!(tcb.name.as_str(), "a-thread-name-we");
    }

    #[test]
    fn test_reinit_clears_previous_life() {
        let mut tcb = ThreadControlBlock::empty(1);
        tcb.init("first");
        tcb.status = ThreadStatus::Finished;
        tcb.join_queue = Some(QueueId::new(4));

        tcb.init("second");
        assert_eq!(tcb.name.as_str(), "second");
        assert_eq!(tcb.status, ThreadStatus::New);
        assert!(tcb.join_queue.is_none());
    }

    #[test]
    fn test_retire_moves_generation_on() {
        let mut tcb = ThreadControlBlock::empty(2);
        tcb.init("first");
        let first = tcb.id;
        assert!(tcb.is_live(first));

        tcb.retire();
        assert!(tcb.is_finished());
        assert!(!tcb.is_live(first));

        tcb.init("second");
        assert_eq!(tcb.id.index(), first.index());
        assert_eq!(tcb.id.generation(), 1);
        assert_ne!(tcb.id, first);
        assert!(tcb.is_live(tcb.id));
        assert!(!tcb.is_live(first));
    }

    #[test]
    fn test_thread_id_display() {
        extern crate std;
        use std::format;
        assert_eq!(format!("{}", ThreadId::new(12)), "T12");
        assert_eq!(format!("{}", ThreadId::new(12).next_generation()), "T12#1");
    }

    #[test]
    #[should_panic]
    fn test_thread_id_out_of_range() {
        let _ = ThreadId::new(MAX_THREADS);
    }
}
