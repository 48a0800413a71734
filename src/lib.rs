//! # DonOS: Donation Operating System
//!
//! A priority-donation thread scheduler core for single-CPU kernels.
//!
//! ## Overview
//!
//! Threads wait on *resource queues*: the ready queue, a lock, a join. When
//! a queue transfers priority, its holder runs with the effective priority
//! of the best thread waiting behind it, so a low-priority thread holding a
//! lock that a high-priority thread needs cannot be starved by everything
//! in between. Donations chain: a holder that itself waits on another
//! queue passes the donated priority on to that queue's holder.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Threads                 │
//! ├──────────────┬──────────────┬──────────────────────────┤
//! │  Lock        │  Condition   │  Communicator            │
//! │  lock.rs     │  condition.rs│  communicator.rs         │
//! ├──────────────┴──────────────┴──────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   fork() · yield_now() · sleep() · join() · finish()   │
//! │   timer_interrupt() · wait_until() (alarm.rs)          │
//! ├────────────────────────────────────────────────────────┤
//! │           Scheduler (scheduler.rs, donation.rs)        │
//! │   wait_for_access() · acquire() · next_thread()        │
//! │   effective priorities · dirty-flag invalidation       │
//! ├──────────────┬─────────────────────────────────────────┤
//! │  queue.rs    │  state.rs · thread.rs                   │
//! │  QueueId     │  ThreadState · ThreadControlBlock       │
//! ├──────────────┴─────────────────────────────────────────┤
//! │       Critical Sections (sync.rs, critical-section)    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Donation Model
//!
//! The scheduler keeps a bipartite graph of threads and queues:
//!
//! - a thread **waits on** any number of queues
//! - a queue has at most one **holder**
//!
//! ```text
//!   T_high ──waits──► Q_lock ──held by──► T_low ──waits──► Q_join ──held by──► T_worker
//!     (7)                                  (1 → 7)                               (1 → 7)
//! ```
//!
//! A queue's effective priority is the maximum effective priority of its
//! waiters if it transfers priority, `PRIORITY_MIN` otherwise. A thread's
//! effective priority is the maximum of its own priority and those of the
//! queues it holds.
//!
//! Both are cached. Any change marks the affected node dirty and walks
//! downstream along the graph, stopping at nodes that are already dirty
//! and at queues that do not transfer priority. Values are recomputed only
//! when somebody reads them.
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically sized
//! - **No `alloc`**: Pure `core` plus `heapless`
//! - **Arena handles**: threads and queues refer to each other by
//!   [`ThreadId`](thread::ThreadId) / [`QueueId`](queue::QueueId), never by
//!   pointer
//! - **Critical sections**: every graph mutation runs inside
//!   [`sync::free`], backed by the `critical-section` crate

#![no_std]

pub mod alarm;
pub mod communicator;
pub mod condition;
pub mod config;
pub mod donation;
pub mod error;
pub mod kernel;
pub mod lock;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod thread;

pub use error::{Error, Result};
