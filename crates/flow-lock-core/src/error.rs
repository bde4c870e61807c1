//! Error types for flow lock operations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a [`LockContext`](crate::context::LockContext) is no longer live.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was explicitly cancelled.
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors raised by a single store instance.
///
/// A clean "condition not met" outcome is never a `StoreError`; it is
/// reported through the return value of the store operation instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The instance could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The instance rejected our credentials.
    #[error("store authentication failed: {0}")]
    AuthFailed(String),

    /// Any other backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A store error tagged with the position of the instance that produced it.
#[derive(Debug)]
pub struct InstanceFailure {
    /// Index of the instance in the configured store list.
    pub index: usize,
    /// What went wrong.
    pub error: StoreError,
}

impl fmt::Display for InstanceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {}: {}", self.index, self.error)
    }
}

/// Errors that can occur during lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// The caller's context was already done before any store was contacted.
    #[error("context error: {0}")]
    PreconditionFailed(ContextError),

    /// The caller's context ended while the operation was in flight.
    #[error("lock operation was cancelled: {0}")]
    Cancelled(ContextError),

    /// Quorum was not reached, or was reached too late to be useful.
    ///
    /// The caller does not hold the lock.
    #[error(
        "failed to acquire lock: {acquired}/{required} instances after {elapsed:?}{}",
        summarize(.failures)
    )]
    AcquisitionFailed {
        /// Instances that accepted the token.
        acquired: usize,
        /// Instances needed for a quorum.
        required: usize,
        /// Time spent on the final attempt.
        elapsed: Duration,
        /// Store errors observed during the attempt and its cleanup.
        failures: Vec<InstanceFailure>,
    },

    /// Fewer than a quorum of instances confirmed the release.
    ///
    /// This does not mean the lock is still held.
    #[error(
        "failed to release lock: {confirmed}/{required} instances confirmed{}{}",
        interrupted(.cancelled),
        summarize(.failures)
    )]
    ReleaseUncertain {
        /// Instances that confirmed the lease is gone.
        confirmed: usize,
        /// Confirmations needed for a quorum.
        required: usize,
        /// Set when the caller's context ended before every delete answered.
        cancelled: Option<ContextError>,
        /// Store errors observed during release.
        failures: Vec<InstanceFailure>,
    },

    /// A store instance could not be set up.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Invalid resource name.
    #[error("invalid lock name: {0}")]
    InvalidName(String),

    /// Invalid manager configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    /// Returns the per-instance failures attached to an aggregate error.
    pub fn failures(&self) -> &[InstanceFailure] {
        match self {
            Self::AcquisitionFailed { failures, .. } | Self::ReleaseUncertain { failures, .. } => {
                failures
            }
            _ => &[],
        }
    }
}

fn interrupted(cancelled: &Option<ContextError>) -> String {
    match cancelled {
        Some(reason) => format!(", interrupted by {reason}"),
        None => String::new(),
    }
}

fn summarize(failures: &[InstanceFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(" ({})", parts.join("; "))
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
