//! # Errors
//!
//! Capacity exhaustion of the fixed-size tables is the only recoverable
//! failure in DonOS. Contract violations (out-of-range priorities, stale
//! handles, releasing a lock one does not hold) panic. Mutating the
//! scheduler outside a critical section does not compile.

use core::fmt;

/// Recoverable kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every slot of the thread table is in use.
    ThreadTableFull,
    /// Every resource-queue slot is in use.
    QueueTableFull,
    /// The alarm cannot track another sleeper.
    AlarmTableFull,
    /// A communicator cannot park another speaker or listener.
    ChannelFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadTableFull => write!(f, "Thread table full"),
            Error::QueueTableFull => write!(f, "Resource queue table full"),
            Error::AlarmTableFull => write!(f, "Alarm sleeper table full"),
            Error::ChannelFull => write!(f, "Communicator wait list full"),
        }
    }
}

/// Result alias used throughout DonOS.
pub type Result<T> = core::result::Result<T, Error>;
