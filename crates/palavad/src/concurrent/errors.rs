//! Pool construction and submission failures.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Why a task was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Every worker is busy and the queue refused the task.
    Saturated,
    /// The pool no longer accepts work.
    ShutDown,
}

impl fmt::Display for Rejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Saturated => "pool saturated",
            Self::ShutDown => "pool shut down",
        })
    }
}

/// Errors raised by [`PoolBuilder`](super::PoolBuilder) and the pools it
/// builds.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The worker bounds are inconsistent.
    #[error("invalid pool size: min {min}, max {max} (need min <= max and max >= 1)")]
    InvalidSize {
        /// Requested core size.
        min: usize,
        /// Requested maximum size.
        max: usize,
    },
    /// A bounded queue was given no room.
    #[error("bounded queue capacity must be at least 1")]
    InvalidCapacity,
    /// A periodic task was given a zero period.
    #[error("periodic tasks need a non-zero period")]
    InvalidPeriod,
    /// A delay reaches past the range of the monotonic clock.
    #[error("delay of {delay:?} is too long to schedule")]
    DelayTooLong {
        /// Requested delay.
        delay: Duration,
    },
    /// The task was not accepted.
    #[error("task rejected: {reason}")]
    Rejected {
        /// Why the task was rejected.
        reason: Rejection,
    },
    /// The thread factory failed to start a worker.
    #[error("failed to start worker thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl PoolError {
    pub(super) fn rejected(reason: Rejection) -> Self {
        Self::Rejected { reason }
    }

    /// Returns `true` when the error is a rejected submission.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
