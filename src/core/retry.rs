//! Retry policy with linear backoff.

use std::time::Duration;

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the task after waiting out the backoff delay.
    Retry {
        /// How long the task must wait before it becomes admissible again.
        delay: Duration,
    },
    /// Retries are exhausted; the task is permanently failed.
    GiveUp,
}

/// Decides whether a failed task is requeued or marked permanently failed.
///
/// The backoff is linear: the `n`-th retry waits `base_delay * n`. The
/// policy only decides; the scheduler owns the state transition, the
/// wait, and the readmission.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from a retry cap and backoff base delay.
    ///
    /// `max_attempts = 0` means the first failure is terminal.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Maximum number of retries per task.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the fate of a task given its retry count before this failure.
    #[must_use]
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_attempts {
            RetryDecision::Retry {
                delay: self
                    .base_delay
                    .saturating_mul(retry_count.saturating_add(1)),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
