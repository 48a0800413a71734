//! # Synchronization Primitives
//!
//! Non-preemptible critical sections for DonOS. Every mutation of the
//! donation graph must happen inside one: the scheduler performs no locking
//! of its own. Its mutating operations take the [`CriticalSection`] token
//! that only an open section can produce, so code that forgets to disable
//! preemption does not compile.
//!
//! The sections are provided by the `critical-section` crate. On Cortex-M
//! the implementation comes from `cortex-m` (`critical-section-single-core`,
//! interrupts masked through PRIMASK); on a host the `std` implementation of
//! `critical-section` serializes all sections behind one global lock.

use critical_section::{CriticalSection, RestoreState};

/// Preemption state captured by [`disable`], handed back to [`restore`].
///
/// While it is alive preemption stays disabled, and it can vouch for that
/// with a [`CriticalSection`] token.
#[derive(Debug)]
#[must_use = "preemption stays disabled until the state is restored"]
pub struct InterruptState {
    restore: RestoreState,
}

impl InterruptState {
    /// Token proving preemption is disabled, valid while `self` is.
    pub fn critical_section(&self) -> CriticalSection<'_> {
        // SAFETY: `self` only exists between `disable` and `restore`, and
        // `restore` consumes it, so the token cannot outlive the section.
        unsafe { CriticalSection::new() }
    }
}

/// Disable preemption and return the previous state.
///
/// # Safety
/// Every call must be paired with exactly one [`restore`] of the returned
/// state, and nested pairs must be restored in reverse order.
pub unsafe fn disable() -> InterruptState {
    InterruptState {
        restore: critical_section::acquire(),
    }
}

/// Restore the preemption state captured by [`disable`].
///
/// # Safety
/// `state` must come from the most recent unmatched [`disable`] on this
/// execution context.
pub unsafe fn restore(state: InterruptState) {
    critical_section::release(state.restore);
}

/// Execute a closure within a critical section (preemption disabled).
///
/// This is the primary way into the kernel. Sections nest: an inner call
/// made while a section is already held neither re-enables nor re-disables
/// preemption.
///
/// # Usage
/// ```ignore
/// sync::free(|cs| {
///     // Mutate scheduler state safely
///     scheduler.set_priority(cs, thread, 3);
/// });
/// ```
#[inline]
pub fn free<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::thread::ThreadId;

    #[test]
    fn test_free_nests() {
        let inner = free(|_| free(|_| 42));
        assert_eq!(inner, 42);
    }

    #[test]
    fn test_disabled_state_grants_token() {
        let mut scheduler = Scheduler::new();
        let thread = ThreadId::new(3);
        let priority = unsafe {
            let state = disable();
            let cs = state.critical_section();
            scheduler.set_priority(cs, thread, 6);
            let priority = scheduler.get_priority(cs, thread);
            restore(state);
            priority
        };
        assert_eq!(priority, 6);
    }
}
