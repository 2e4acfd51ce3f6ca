//! Task records and derived aggregate counts.

use serde::{Deserialize, Serialize};

use crate::util::{OwnerId, TaskId};

/// Lifecycle state of an upload task.
///
/// Transitions are `Pending -> Uploading -> (Success | Pending | Error)`;
/// a failed attempt returns to `Pending` while retries remain. `Success`
/// and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for admission (initial state, and between retry attempts).
    Pending,
    /// An attempt is in flight against the storage client.
    Uploading,
    /// The payload was stored. Terminal.
    Success,
    /// Retries are exhausted. Terminal.
    Error,
}

/// One unit of upload work: a payload's bookkeeping.
///
/// Records are owned and mutated exclusively by the scheduler; listeners
/// and callers only ever see clones. Mutators are no-ops once the record
/// has reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// Unique identifier within the scheduler instance.
    pub id: TaskId,
    /// Logical group the task belongs to.
    pub owner: OwnerId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Transfer progress, clamped to `[0, 100]`.
    pub progress: u8,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Failure message, present only when `state` is [`TaskState::Error`].
    pub error: Option<String>,
}

impl UploadTask {
    /// Create a fresh pending record.
    #[must_use]
    pub fn new(id: TaskId, owner: OwnerId) -> Self {
        Self {
            id,
            owner,
            state: TaskState::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
        }
    }

    /// Whether no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Success | TaskState::Error)
    }

    /// Forward a reported percentage, clamped to `[0, 100]`.
    pub(crate) fn set_progress(&mut self, percent: u32) {
        if self.is_terminal() {
            return;
        }
        self.progress = percent.min(100) as u8;
    }

    pub(crate) fn mark_uploading(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state = TaskState::Uploading;
    }

    /// Terminal success; progress is pinned to 100.
    pub(crate) fn mark_success(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state = TaskState::Success;
        self.progress = 100;
    }

    /// Back to `Pending` after a failed attempt, with the incremented
    /// retry count. Progress resets so listeners don't render a stale
    /// percentage on a task that is waiting again.
    pub(crate) fn mark_retry_pending(&mut self, retry_count: u32) {
        if self.is_terminal() {
            return;
        }
        self.state = TaskState::Pending;
        self.retry_count = retry_count;
        self.progress = 0;
        self.error = None;
    }

    /// Terminal failure with the last attempt's message.
    pub(crate) fn mark_failed(&mut self, message: String) {
        if self.is_terminal() {
            return;
        }
        self.state = TaskState::Error;
        self.progress = 0;
        self.error = Some(message);
    }
}

/// Aggregate counts over the task collection, derived on demand.
///
/// The per-state counts always sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatus {
    /// Number of tracked tasks.
    pub total: usize,
    /// Tasks waiting for admission.
    pub pending: usize,
    /// Tasks with an attempt in flight.
    pub uploading: usize,
    /// Tasks stored successfully.
    pub success: usize,
    /// Tasks that exhausted their retries.
    pub error: usize,
}

impl GlobalStatus {
    /// Derive counts from the current task collection in one pass.
    pub fn from_tasks<'a, I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a UploadTask>,
    {
        let mut status = Self::default();
        for task in tasks {
            status.total += 1;
            match task.state {
                TaskState::Pending => status.pending += 1,
                TaskState::Uploading => status.uploading += 1,
                TaskState::Success => status.success += 1,
                TaskState::Error => status.error += 1,
            }
        }
        status
    }

    /// Whether every tracked task has reached a terminal state.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }
}
