//! Upload scheduler: task table ownership, admission control, retry drive.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::progress::{ProgressHub, ProgressListener};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::storage::{ProgressReporter, StorageClient, UploadPayload};
use crate::core::task::{GlobalStatus, TaskState, UploadTask};
use crate::util::{OwnerId, TaskId};

/// Bookkeeping for one tracked payload.
struct TaskEntry<P> {
    payload: P,
    record: UploadTask,
}

/// The task collection plus the admission queue, guarded as one unit so
/// every mutation observes a consistent view.
struct TaskTable<P> {
    /// Submission order of ids, for snapshots.
    order: Vec<TaskId>,
    entries: HashMap<TaskId, TaskEntry<P>>,
    /// Ids admissible for launch, in submission order for first attempts.
    queue: VecDeque<TaskId>,
}

impl<P> TaskTable<P> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
            queue: VecDeque::new(),
        }
    }
}

/// State shared between the admission loop and in-flight attempts.
struct Shared<P> {
    table: Mutex<TaskTable<P>>,
    hub: ProgressHub,
}

impl<P: UploadPayload> Shared<P> {
    fn new() -> Self {
        Self {
            table: Mutex::new(TaskTable::new()),
            hub: ProgressHub::new(),
        }
    }

    /// Clone the full task list in submission order.
    fn snapshot(&self) -> Vec<UploadTask> {
        let table = self.table.lock();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id).map(|e| e.record.clone()))
            .collect()
    }

    /// Notify listeners with a fresh snapshot, outside the table lock.
    fn publish(&self) {
        let snapshot = self.snapshot();
        self.hub.notify(&snapshot);
    }

    fn status(&self) -> GlobalStatus {
        let table = self.table.lock();
        GlobalStatus::from_tasks(table.entries.values().map(|e| &e.record))
    }

    /// Pop the next admissible task id, skipping ids whose entry is gone.
    fn pop_admissible(&self) -> Option<TaskId> {
        let mut table = self.table.lock();
        let table = &mut *table;
        while let Some(id) = table.queue.pop_front() {
            if table.entries.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Transition a pending task to `Uploading` and hand back its payload.
    ///
    /// Returns `None` if the task vanished (cleared) or is no longer
    /// pending (overwritten while queued); the caller skips it.
    fn begin_attempt(&self, id: &TaskId) -> Option<P> {
        let payload = {
            let mut table = self.table.lock();
            let entry = table.entries.get_mut(id)?;
            if entry.record.state != TaskState::Pending {
                return None;
            }
            entry.record.mark_uploading();
            entry.payload.clone()
        };
        self.publish();
        Some(payload)
    }

    fn set_progress(&self, id: &TaskId, percent: u32, phase: &str) {
        let mutated = {
            let mut table = self.table.lock();
            table.entries.get_mut(id).is_some_and(|entry| {
                entry.record.set_progress(percent);
                true
            })
        };
        if mutated {
            trace!(task = %id, percent, phase, "progress report");
            self.publish();
        }
    }

    fn finish_success(&self, id: &TaskId) {
        let mutated = {
            let mut table = self.table.lock();
            table.entries.get_mut(id).is_some_and(|entry| {
                entry.record.mark_success();
                true
            })
        };
        if mutated {
            self.publish();
        }
    }

    fn finish_failed(&self, id: &TaskId, message: String) {
        let mutated = {
            let mut table = self.table.lock();
            table.entries.get_mut(id).is_some_and(|entry| {
                entry.record.mark_failed(message);
                true
            })
        };
        if mutated {
            self.publish();
        }
    }

    fn park_for_retry(&self, id: &TaskId, retry_count: u32) {
        let mutated = {
            let mut table = self.table.lock();
            table.entries.get_mut(id).is_some_and(|entry| {
                entry.record.mark_retry_pending(retry_count);
                true
            })
        };
        if mutated {
            self.publish();
        }
    }

    /// Make a parked task admissible again, after its backoff elapsed.
    fn requeue(&self, id: &TaskId) {
        let mut table = self.table.lock();
        let table = &mut *table;
        let still_pending = table
            .entries
            .get(id)
            .is_some_and(|e| e.record.state == TaskState::Pending);
        if still_pending && !table.queue.contains(id) {
            table.queue.push_back(id.clone());
        }
    }

    fn retry_count(&self, id: &TaskId) -> Option<u32> {
        let table = self.table.lock();
        table.entries.get(id).map(|e| e.record.retry_count)
    }
}

/// How one admitted attempt settled, reported back to the admission loop.
enum AttemptOutcome {
    Succeeded(TaskId),
    Retrying,
    Failed,
}

/// Coordinates parallel upload of media assets against an injected
/// [`StorageClient`], under a hard concurrency cap with per-task retry
/// and live progress reporting.
///
/// The scheduler is the sole writer of its task collection; callers and
/// listeners only ever observe cloned snapshots. It holds no persisted
/// state and never cancels an upload already handed to the storage
/// client.
pub struct UploadScheduler<P, C>
where
    P: UploadPayload,
    C: StorageClient<P>,
{
    shared: Arc<Shared<P>>,
    storage: Arc<C>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl<P, C> UploadScheduler<P, C>
where
    P: UploadPayload,
    C: StorageClient<P>,
{
    /// Build a scheduler over a storage client.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if the configuration
    /// fails validation.
    pub fn new(storage: C, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            shared: Arc::new(Shared::new()),
            storage: Arc::new(storage),
            policy: RetryPolicy::new(config.max_attempts, config.base_delay()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
        })
    }

    /// Register `payloads` as pending tasks belonging to `owner`.
    ///
    /// Each payload becomes one `Pending` task with progress 0 and retry
    /// count 0. An empty iterator is a no-op. Re-adding a payload whose id
    /// is already tracked overwrites that task's bookkeeping (last write
    /// wins) and makes it admissible again; its submission-order slot is
    /// retained. Fires one listener notification per non-empty batch.
    pub fn add_tasks<I>(&self, owner: &OwnerId, payloads: I)
    where
        I: IntoIterator<Item = P>,
    {
        let mut added = 0_usize;
        {
            let mut table = self.shared.table.lock();
            let table = &mut *table;
            for payload in payloads {
                let id = payload.task_id();
                let record = UploadTask::new(id.clone(), owner.clone());
                if table
                    .entries
                    .insert(id.clone(), TaskEntry { payload, record })
                    .is_none()
                {
                    table.order.push(id.clone());
                }
                if !table.queue.contains(&id) {
                    table.queue.push_back(id);
                }
                added += 1;
            }
        }
        if added > 0 {
            debug!(owner = %owner, count = added, "tasks registered");
            self.shared.publish();
        }
    }

    /// Register a listener invoked synchronously after every task mutation
    /// with the full current task list. Multiple listeners are supported;
    /// a panicking listener is caught and logged without affecting uploads
    /// or other listeners.
    pub fn on_progress<L>(&self, listener: L)
    where
        L: ProgressListener + 'static,
    {
        self.shared.hub.register(Arc::new(listener));
    }

    /// Process all pending tasks to a terminal state.
    ///
    /// Tasks are admitted in submission order; at most `max_concurrent`
    /// are in flight at once, enforced by a counting semaphore acquired
    /// before each launch and released when the attempt settles. A failed
    /// attempt consults the retry policy: either the task re-enters the
    /// admission queue after its backoff delay (with the concurrency slot
    /// released for the wait), or it is marked terminally failed.
    ///
    /// Resolves with the ids of tasks that reached `Success` during this
    /// call. Individual task failures never reject; callers inspect
    /// [`status`](Self::status) to detect partial failure.
    ///
    /// # Errors
    ///
    /// Rejects only on a scheduler-level fault: a closed admission
    /// semaphore, or a storage client that panicked instead of returning
    /// an error.
    pub async fn start(&self) -> Result<Vec<TaskId>, SchedulerError> {
        let mut inflight: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut succeeded = Vec::new();

        loop {
            if let Some(id) = self.shared.pop_admissible() {
                let permit = Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| SchedulerError::Admission(format!("semaphore closed: {e}")))?;
                let Some(payload) = self.shared.begin_attempt(&id) else {
                    drop(permit);
                    continue;
                };
                debug!(task = %id, "attempt launched");
                inflight.spawn(Self::run_attempt(
                    Arc::clone(&self.shared),
                    Arc::clone(&self.storage),
                    self.policy,
                    id,
                    payload,
                    permit,
                ));
            } else {
                // Queue drained. Either everything settled, or an attempt is
                // still in flight (possibly sleeping out a backoff) and may
                // requeue its task.
                let Some(joined) = inflight.join_next().await else {
                    break;
                };
                match joined {
                    Ok(AttemptOutcome::Succeeded(id)) => succeeded.push(id),
                    Ok(AttemptOutcome::Retrying | AttemptOutcome::Failed) => {}
                    Err(e) => {
                        error!(error = %e, "upload attempt aborted");
                        return Err(SchedulerError::AttemptAborted(e.to_string()));
                    }
                }
            }
        }

        info!(succeeded = succeeded.len(), "upload run settled");
        Ok(succeeded)
    }

    /// Aggregate counts over the current task collection.
    #[must_use]
    pub fn status(&self) -> GlobalStatus {
        self.shared.status()
    }

    /// The same read-only task list listeners receive, in submission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.shared.snapshot()
    }

    /// Discard all tracked tasks and queued admissions, and notify
    /// listeners with the now-empty list.
    ///
    /// Uploads already handed to the storage client keep running; their
    /// late progress and completion reports target dropped ids and are
    /// ignored.
    pub fn clear(&self) {
        {
            let mut table = self.shared.table.lock();
            table.order.clear();
            table.entries.clear();
            table.queue.clear();
        }
        debug!("task table cleared");
        self.shared.publish();
    }

    /// Drive one admitted attempt to its outcome. Holds `permit` while the
    /// upload is in flight; on retry the permit is dropped before the
    /// backoff sleep so siblings can use the slot.
    async fn run_attempt(
        shared: Arc<Shared<P>>,
        storage: Arc<C>,
        policy: RetryPolicy,
        id: TaskId,
        payload: P,
        permit: OwnedSemaphorePermit,
    ) -> AttemptOutcome {
        let reporter = {
            let shared = Arc::clone(&shared);
            let id = id.clone();
            ProgressReporter::new(move |percent, phase| shared.set_progress(&id, percent, phase))
        };

        match storage.upload(payload, reporter).await {
            Ok(asset) => {
                info!(task = %id, asset = %asset, "upload complete");
                shared.finish_success(&id);
                drop(permit);
                AttemptOutcome::Succeeded(id)
            }
            Err(err) => {
                let retry_count = shared.retry_count(&id).unwrap_or(0);
                match policy.decide(retry_count) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            task = %id,
                            retry = retry_count + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "upload failed, backing off before retry"
                        );
                        shared.park_for_retry(&id, retry_count + 1);
                        drop(permit);
                        tokio::time::sleep(delay).await;
                        shared.requeue(&id);
                        AttemptOutcome::Retrying
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            task = %id,
                            retries = retry_count,
                            error = %err,
                            "upload failed permanently"
                        );
                        shared.finish_failed(&id, err.to_string());
                        drop(permit);
                        AttemptOutcome::Failed
                    }
                }
            }
        }
    }
}
