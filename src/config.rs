//! # DonOS Configuration
//!
//! Compile-time constants governing the scheduler and the kernel model.
//! All limits are fixed at compile time. Nothing is allocated dynamically.

/// Scheduling priority. Higher values are more important.
pub type Priority = u8;

/// The lowest priority a thread can have. Also the effective priority of
/// an empty or non-donating resource queue.
pub const PRIORITY_MIN: Priority = 0;

/// The highest priority a thread can have.
pub const PRIORITY_MAX: Priority = 7;

/// Base priority given to a thread on its first contact with the scheduler.
pub const PRIORITY_DEFAULT: Priority = 1;

/// Maximum number of threads the kernel can manage simultaneously.
/// This bounds the thread table, the scheduling-state arena, and every
/// wait list.
pub const MAX_THREADS: usize = 16;

/// Maximum number of live resource queues. Held and waited-on queue sets
/// are `u64` bitsets, so this may not exceed 64.
pub const MAX_QUEUES: usize = 64;

/// Maximum length of a thread name in bytes. Longer names are truncated.
pub const THREAD_NAME_LEN: usize = 16;

/// Clock ticks between two timer interrupts. Each interrupt advances the
/// kernel clock by this amount, wakes due sleepers and preempts the
/// running thread.
pub const TIMER_INTERVAL: u64 = 500;

const _: () = assert!(MAX_QUEUES <= 64);
const _: () = assert!(MAX_THREADS <= u8::MAX as usize);
const _: () = assert!(PRIORITY_MIN <= PRIORITY_DEFAULT && PRIORITY_DEFAULT <= PRIORITY_MAX);
