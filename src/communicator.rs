//! # Communicator
//!
//! Synchronous word exchange between threads. A speaker blocks until a
//! listener takes its word; a listener blocks until a word arrives. Each
//! word is delivered to exactly one listener, and pairing is first come,
//! first served on both sides.
//!
//! Whichever side arrives second completes the exchange and readies the
//! parked partner. A listener that was parked picks its word up with
//! [`Communicator::collect`] once it runs again.

use heapless::Deque;
use log::trace;

use crate::config::MAX_THREADS;
use crate::error::{Error, Result};
use crate::kernel::{Kernel, Outcome};
use crate::thread::ThreadId;

/// What a call to [`Communicator::listen`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    /// A parked speaker's word, taken immediately.
    Received(u32),
    /// No speaker was waiting; the caller is parked.
    Blocked,
}

/// Rendezvous point for speakers and listeners.
#[derive(Debug)]
pub struct Communicator {
    speakers: Deque<(ThreadId, u32), MAX_THREADS>,
    listeners: Deque<ThreadId, MAX_THREADS>,
    /// Words handed to parked listeners, indexed by thread.
    delivered: [Option<u32>; MAX_THREADS],
}

impl Communicator {
    /// A communicator nobody is waiting on.
    pub const fn new() -> Self {
        Self {
            speakers: Deque::new(),
            listeners: Deque::new(),
            delivered: [None; MAX_THREADS],
        }
    }

    /// Send `word`. Completes at once if a listener is parked, otherwise
    /// parks the caller until a listener takes the word.
    ///
    /// # Errors
    /// [`Error::ChannelFull`] if no more speakers can be parked.
    pub fn speak(&mut self, kernel: &mut Kernel, word: u32) -> Result<Outcome> {
        let me = kernel.current_thread();
        match self.listeners.pop_front() {
            Some(listener) => {
                trace!("{} speaks {} to {}", me, word, listener);
                self.delivered[listener.index()] = Some(word);
                kernel.ready(listener);
                Ok(Outcome::Completed)
            }
            None => {
                self.speakers
                    .push_back((me, word))
                    .map_err(|_| Error::ChannelFull)?;
                kernel.sleep();
                Ok(Outcome::Blocked)
            }
        }
    }

    /// Receive a word. Takes a parked speaker's word at once if there is
    /// one, otherwise parks the caller.
    ///
    /// # Errors
    /// [`Error::ChannelFull`] if no more listeners can be parked.
    pub fn listen(&mut self, kernel: &mut Kernel) -> Result<Listen> {
        let me = kernel.current_thread();
        match self.speakers.pop_front() {
            Some((speaker, word)) => {
                trace!("{} hears {} from {}", me, word, speaker);
                kernel.ready(speaker);
                Ok(Listen::Received(word))
            }
            None => {
                self.listeners.push_back(me).map_err(|_| Error::ChannelFull)?;
                kernel.sleep();
                Ok(Listen::Blocked)
            }
        }
    }

    /// Take the word delivered to the calling thread while it was parked.
    pub fn collect(&mut self, kernel: &Kernel) -> Option<u32> {
        self.delivered[kernel.current_thread().index()].take()
    }

    /// Speakers parked with an undelivered word.
    pub fn waiting_speakers(&self) -> usize {
        self.speakers.len()
    }

    /// Listeners parked without a word.
    pub fn waiting_listeners(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}
