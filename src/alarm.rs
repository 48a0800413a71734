//! # Alarm
//!
//! Timed sleep. Threads park until the kernel clock reaches a wake time;
//! the timer interrupt hands every due sleeper back to the ready queue.
//! The alarm itself only keeps the sleeper table: see
//! [`Kernel::wait_until`](crate::kernel::Kernel::wait_until) and
//! [`Kernel::timer_interrupt`](crate::kernel::Kernel::timer_interrupt).

use heapless::Vec;

use crate::config::MAX_THREADS;
use crate::error::{Error, Result};
use crate::thread::ThreadId;

/// Sleepers ordered by wake time. Equal wake times keep arrival order.
#[derive(Debug, Clone)]
pub struct Alarm {
    sleepers: Vec<(u64, ThreadId), MAX_THREADS>,
}

impl Alarm {
    /// An alarm with no sleepers.
    pub const fn new() -> Self {
        Self {
            sleepers: Vec::new(),
        }
    }

    /// Register `thread` to wake once the clock reaches `wake_time`.
    ///
    /// # Errors
    /// [`Error::AlarmTableFull`] if every sleeper slot is taken.
    pub fn schedule(&mut self, wake_time: u64, thread: ThreadId) -> Result<()> {
        let pos = self
            .sleepers
            .iter()
            .position(|&(t, _)| t > wake_time)
            .unwrap_or(self.sleepers.len());
        self.sleepers
            .insert(pos, (wake_time, thread))
            .map_err(|_| Error::AlarmTableFull)
    }

    /// Remove and return the earliest sleeper whose wake time is `<= now`.
    pub fn pop_expired(&mut self, now: u64) -> Option<ThreadId> {
        match self.sleepers.first() {
            Some(&(wake_time, _)) if wake_time <= now => Some(self.sleepers.remove(0).1),
            _ => None,
        }
    }

    /// Forget a sleeper that was woken some other way. Returns whether it
    /// was found.
    pub fn cancel(&mut self, thread: ThreadId) -> bool {
        match self.sleepers.iter().position(|&(_, t)| t == thread) {
            Some(pos) => {
                self.sleepers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Wake time of the next sleeper due.
    pub fn next_wake_time(&self) -> Option<u64> {
        self.sleepers.first().map(|&(wake_time, _)| wake_time)
    }
}

impl Default for Alarm {
    fn default() -> Self {
        Self::new()
    }
}
