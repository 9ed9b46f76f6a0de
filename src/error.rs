use std::time::Duration;

/// Reasons a pool configuration is rejected by `Builder::build`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// `max_workers` is smaller than `persistent_workers`
    #[error("`max_workers` ({max}) cannot be less than `persistent_workers` ({persistent})")]
    MaxBelowPersistent {
        /// Configured persistent worker target
        persistent: usize,
        /// Configured worker ceiling
        max: usize,
    },

    /// Transient workers would retire without ever waiting for work
    #[error("idle timeout must be greater than zero, got {0:?}")]
    ZeroIdleTimeout(Duration),
}

/// A blocked wait on the backlog queue was interrupted
///
/// Returned to threads parked in `BacklogQueue::take` or
/// `BacklogQueue::poll_timeout` when `BacklogQueue::interrupt_waiters` is
/// called. A pool worker treats this as fatal and exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait on the backlog queue was interrupted")]
pub struct Interrupted;
