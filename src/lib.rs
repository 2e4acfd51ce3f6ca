//! # Asset Courier
//!
//! A bounded-concurrency upload scheduler for media asset pipelines.
//!
//! This library coordinates parallel transfer of media assets to a remote
//! storage backend. It owns nothing but in-process bookkeeping: callers submit
//! batches of payloads, the scheduler drives each one through an injected
//! [`core::StorageClient`] under a hard concurrency cap, failed transfers are
//! retried with linear backoff, and registered listeners receive a full task
//! snapshot after every state change.
//!
//! ## Core Problem Solved
//!
//! Media uploads have awkward failure characteristics for application code:
//!
//! - **Flaky transports**: a single dropped connection should not fail a batch
//! - **Bandwidth saturation**: launching every upload at once starves them all
//! - **Partial failure**: one permanently failed asset must not sink its siblings
//! - **Live feedback**: users expect per-file progress, not a spinner
//!
//! ## Key Features
//!
//! - **True counting semaphore**: at no point are more than `max_concurrent`
//!   tasks in flight, even under bursty submission
//! - **Per-task retry with linear backoff**: a failed task releases its
//!   concurrency slot during the backoff wait and re-enters the ordinary
//!   admission queue
//! - **Partial-failure isolation**: `start()` resolves with the ids that
//!   succeeded; permanently failed tasks surface through their terminal
//!   `Error` state
//! - **Snapshot-based progress**: listeners get a read-only view of every
//!   task after each mutation, with listener panics contained and logged
//!
//! ```rust,ignore
//! use asset_courier::config::SchedulerConfig;
//! use asset_courier::core::UploadScheduler;
//! use asset_courier::util::OwnerId;
//!
//! let scheduler = UploadScheduler::new(my_storage_client, SchedulerConfig::default())?;
//! scheduler.on_progress(|tasks: &[_]| render_progress(tasks));
//! scheduler.add_tasks(&OwnerId::new("listing-42"), photos);
//!
//! let uploaded = scheduler.start().await?;
//! println!("{} of {} assets uploaded", uploaded.len(), scheduler.status().total);
//! ```
//!
//! For complete examples, see `tests/upload_scheduler_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task model, scheduler, retry policy, and the storage client seam.
pub mod core;
/// Configuration for concurrency and retry behavior.
pub mod config;
/// Shared utilities: identifiers and telemetry bootstrap.
pub mod util;
