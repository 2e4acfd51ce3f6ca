//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// Individual upload failures never surface here; they are absorbed by the
/// retry policy and reported through the task's terminal state. These
/// variants cover faults of the scheduler itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The admission loop hit an unrecoverable fault.
    #[error("admission fault: {0}")]
    Admission(String),
    /// An upload attempt aborted outside the expected failure channel,
    /// e.g. a panic inside the storage client.
    #[error("attempt aborted: {0}")]
    AttemptAborted(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
