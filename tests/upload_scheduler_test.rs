//! Integration tests for the upload scheduler.
//!
//! These tests drive the full admission loop against a scripted fake
//! storage client and validate:
//! 1. Batches settle with every task terminal
//! 2. The concurrency cap is never exceeded, even with retries in flight
//! 3. Flaky tasks recover within the retry budget
//! 4. Exhausted tasks fail terminally without sinking siblings
//! 5. First attempts launch in submission order

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use asset_courier::config::SchedulerConfig;
use asset_courier::core::{
    AppResult, GlobalStatus, ProgressReporter, StorageClient, TaskState, UploadPayload,
    UploadScheduler,
};
use asset_courier::util::{AssetId, OwnerId, TaskId};

// Test payload type
#[derive(Clone)]
struct AssetBlob {
    id: TaskId,
    name: String,
}

impl UploadPayload for AssetBlob {
    fn task_id(&self) -> TaskId {
        self.id.clone()
    }
}

fn blobs(n: usize) -> Vec<AssetBlob> {
    (0..n)
        .map(|i| AssetBlob {
            id: TaskId::new(format!("photo-{i}")),
            name: format!("photo_{i}.jpg"),
        })
        .collect()
}

fn cfg(max_concurrent: usize, max_attempts: u32, base_delay_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        max_attempts,
        base_delay_ms,
    }
}

// Fake storage client with scripted failures and in-flight accounting
#[derive(Clone)]
struct FakeStorage {
    fail_counts: Arc<Mutex<HashMap<TaskId, u32>>>,
    attempts: Arc<Mutex<HashMap<TaskId, u32>>>,
    started: Arc<Mutex<Vec<TaskId>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
    jitter: bool,
}

impl FakeStorage {
    fn reliable() -> Self {
        Self {
            fail_counts: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            started: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    fn jittered() -> Self {
        Self {
            jitter: true,
            ..Self::reliable()
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::reliable()
        }
    }

    /// Script the next `count` attempts for `id` to fail.
    fn fail_next(&self, id: &str, count: u32) {
        self.fail_counts.lock().insert(TaskId::new(id), count);
    }

    fn attempts_for(&self, id: &str) -> u32 {
        self.attempts
            .lock()
            .get(&TaskId::new(id))
            .copied()
            .unwrap_or(0)
    }

    fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageClient<AssetBlob> for FakeStorage {
    async fn upload(&self, payload: AssetBlob, progress: ProgressReporter) -> AppResult<AssetId> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.started.lock().push(payload.task_id());
        *self.attempts.lock().entry(payload.task_id()).or_insert(0) += 1;

        progress.report(10, "handshake");
        let delay = if self.jitter {
            Duration::from_millis(rand::rng().random_range(1..6))
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        progress.report(60, "transfer");

        let fail = {
            let mut counts = self.fail_counts.lock();
            match counts.get_mut(&payload.task_id()) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if fail {
            anyhow::bail!("simulated transfer failure for {}", payload.task_id());
        }
        progress.report(100, "finalize");
        Ok(AssetId::new(format!("blob/{}", payload.name)))
    }
}

#[tokio::test]
async fn test_batch_settles_under_concurrency_cap() {
    asset_courier::util::init_tracing();
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage.clone(), cfg(2, 3, 5)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(5));
    let uploaded = scheduler.start().await.unwrap();

    assert_eq!(uploaded.len(), 5);
    assert_eq!(
        scheduler.status(),
        GlobalStatus {
            total: 5,
            pending: 0,
            uploading: 0,
            success: 5,
            error: 0,
        }
    );
    assert!(storage.peak_concurrency() <= 2);
}

#[tokio::test]
async fn test_empty_batch_settles_immediately() {
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage, cfg(2, 3, 5)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), Vec::new());
    let uploaded = scheduler.start().await.unwrap();

    assert!(uploaded.is_empty());
    assert_eq!(scheduler.status().total, 0);
}

#[tokio::test]
async fn test_flaky_task_recovers_within_retry_budget() {
    let storage = FakeStorage::reliable();
    storage.fail_next("photo-0", 2);
    let scheduler = UploadScheduler::new(storage.clone(), cfg(2, 3, 2)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(1));
    let uploaded = scheduler.start().await.unwrap();

    assert_eq!(uploaded, vec![TaskId::new("photo-0")]);
    assert_eq!(storage.attempts_for("photo-0"), 3);

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, TaskState::Success);
    assert_eq!(snapshot[0].retry_count, 2);
    assert_eq!(snapshot[0].progress, 100);
}

#[tokio::test]
async fn test_exhausted_retries_mark_task_failed() {
    let storage = FakeStorage::reliable();
    storage.fail_next("photo-0", u32::MAX);
    let scheduler = UploadScheduler::new(storage.clone(), cfg(2, 3, 2)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(1));
    let uploaded = scheduler.start().await.unwrap();

    assert!(uploaded.is_empty());
    // initial attempt plus three retries
    assert_eq!(storage.attempts_for("photo-0"), 4);

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot[0].state, TaskState::Error);
    assert_eq!(snapshot[0].retry_count, 3);
    assert_eq!(snapshot[0].progress, 0);
    assert!(snapshot[0]
        .error
        .as_deref()
        .unwrap()
        .contains("simulated transfer failure"));
}

#[tokio::test]
async fn test_permanent_failure_does_not_sink_siblings() {
    let storage = FakeStorage::reliable();
    storage.fail_next("photo-2", u32::MAX);
    let scheduler = UploadScheduler::new(storage, cfg(2, 1, 2)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(4));
    let mut uploaded = scheduler.start().await.unwrap();
    uploaded.sort();

    assert_eq!(
        uploaded,
        vec![
            TaskId::new("photo-0"),
            TaskId::new("photo-1"),
            TaskId::new("photo-3"),
        ]
    );
    let status = scheduler.status();
    assert_eq!(status.success, 3);
    assert_eq!(status.error, 1);
    assert!(status.is_settled());
}

#[tokio::test]
async fn test_concurrency_cap_holds_with_retries_in_flight() {
    let storage = FakeStorage::jittered();
    storage.fail_next("photo-3", 2);
    storage.fail_next("photo-7", 1);
    storage.fail_next("photo-11", 3);
    let scheduler = UploadScheduler::new(storage.clone(), cfg(3, 3, 1)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(20));
    let uploaded = scheduler.start().await.unwrap();

    assert_eq!(uploaded.len(), 20);
    assert!(
        storage.peak_concurrency() <= 3,
        "observed {} concurrent uploads",
        storage.peak_concurrency()
    );
    assert_eq!(scheduler.status().success, 20);
}

#[tokio::test]
async fn test_first_attempts_launch_in_submission_order() {
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage.clone(), cfg(1, 3, 2)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(6));
    scheduler.start().await.unwrap();

    let started = storage.started.lock().clone();
    let expected: Vec<TaskId> = (0..6).map(|i| TaskId::new(format!("photo-{i}"))).collect();
    assert_eq!(started, expected);
}

#[tokio::test]
async fn test_duplicate_id_overwrites_bookkeeping() {
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage.clone(), cfg(2, 3, 2)).unwrap();

    let owner = OwnerId::new("listing-1");
    scheduler.add_tasks(&owner, blobs(1));
    // same id again before the run: last write wins, still one task
    scheduler.add_tasks(
        &owner,
        vec![AssetBlob {
            id: TaskId::new("photo-0"),
            name: "photo_0_retouched.jpg".into(),
        }],
    );

    let uploaded = scheduler.start().await.unwrap();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(scheduler.status().total, 1);
    assert_eq!(storage.attempts_for("photo-0"), 1);
}

#[tokio::test]
async fn test_readding_terminal_task_makes_it_admissible_again() {
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage.clone(), cfg(2, 3, 2)).unwrap();

    let owner = OwnerId::new("listing-1");
    scheduler.add_tasks(&owner, blobs(1));
    scheduler.start().await.unwrap();
    assert_eq!(storage.attempts_for("photo-0"), 1);

    scheduler.add_tasks(&owner, blobs(1));
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot[0].state, TaskState::Pending);
    assert_eq!(snapshot[0].retry_count, 0);

    let uploaded = scheduler.start().await.unwrap();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(storage.attempts_for("photo-0"), 2);
}

#[tokio::test]
async fn test_clear_drops_bookkeeping_without_cancelling_flight() {
    let storage = FakeStorage::with_delay(Duration::from_millis(30));
    let scheduler = Arc::new(UploadScheduler::new(storage, cfg(2, 3, 5)).unwrap());

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(4));
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.start().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.clear();

    // the run settles cleanly; late completions against dropped ids are ignored
    runner.await.unwrap().unwrap();
    assert_eq!(scheduler.status().total, 0);
    assert!(scheduler.snapshot().is_empty());
}

#[tokio::test]
async fn test_concurrent_batch_submissions() {
    let storage = FakeStorage::reliable();
    let scheduler = Arc::new(UploadScheduler::new(storage, cfg(4, 3, 2)).unwrap());

    let submits = (0..4).map(|batch| {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let owner = OwnerId::new(format!("listing-{batch}"));
            let payloads: Vec<AssetBlob> = (0..5)
                .map(|i| AssetBlob {
                    id: TaskId::new(format!("batch{batch}-photo{i}")),
                    name: format!("b{batch}_p{i}.jpg"),
                })
                .collect();
            scheduler.add_tasks(&owner, payloads);
        })
    });
    futures::future::join_all(submits).await;

    let uploaded = scheduler.start().await.unwrap();
    assert_eq!(uploaded.len(), 20);
    assert_eq!(scheduler.status().success, 20);
}

#[tokio::test]
async fn test_status_reads_are_idempotent() {
    let storage = FakeStorage::reliable();
    let scheduler = UploadScheduler::new(storage, cfg(2, 3, 5)).unwrap();

    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(3));
    let first = scheduler.status();
    let second = scheduler.status();
    assert_eq!(first, second);
    assert_eq!(first.total, 3);
    assert_eq!(first.pending, 3);
}

#[tokio::test]
async fn test_storage_panic_is_a_scheduler_fault() {
    #[derive(Clone)]
    struct PanickingStorage;

    #[async_trait]
    impl StorageClient<AssetBlob> for PanickingStorage {
        async fn upload(
            &self,
            _payload: AssetBlob,
            _progress: ProgressReporter,
        ) -> AppResult<AssetId> {
            panic!("client bug outside the error channel");
        }
    }

    let scheduler = UploadScheduler::new(PanickingStorage, cfg(2, 3, 5)).unwrap();
    scheduler.add_tasks(&OwnerId::new("listing-1"), blobs(2));
    assert!(scheduler.start().await.is_err());
}

#[tokio::test]
async fn test_rejects_zero_concurrency() {
    let storage = FakeStorage::reliable();
    assert!(UploadScheduler::new(storage, cfg(0, 3, 1000)).is_err());
}
