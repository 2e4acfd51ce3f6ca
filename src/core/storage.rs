//! The storage client seam and progress reporting handle.

use std::fmt;

use async_trait::async_trait;

use crate::core::error::AppResult;
use crate::util::{AssetId, TaskId};

/// Marker trait for units of upload work supplied by the caller.
///
/// Payloads are opaque to the scheduler apart from their id; a typical
/// implementation carries a file handle or buffer plus a target location.
/// `Clone` is required because each retry attempt hands the storage client
/// a fresh copy.
pub trait UploadPayload: Send + Sync + Clone + 'static {
    /// Identifier of the task this payload belongs to, unique within a
    /// scheduler instance. Re-submitting a payload with an already-tracked
    /// id overwrites that task's bookkeeping.
    fn task_id(&self) -> TaskId;
}

/// Handle the storage client uses to report transfer progress.
///
/// Constructed by the scheduler for each attempt; reports are clamped to
/// `[0, 100]` and fanned out to registered listeners. Clients should
/// report non-decreasing percentages.
pub struct ProgressReporter {
    emit: Box<dyn Fn(u32, &str) + Send + Sync>,
}

impl ProgressReporter {
    /// Wrap a raw reporting callback. Normally constructed by the
    /// scheduler; exposed for storage client tests.
    pub fn new(emit: impl Fn(u32, &str) + Send + Sync + 'static) -> Self {
        Self {
            emit: Box::new(emit),
        }
    }

    /// Report the current transfer percentage and phase label.
    pub fn report(&self, percent: u32, phase: &str) {
        (self.emit)(percent, phase);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter(..)")
    }
}

/// External collaborator that performs the actual data transfer.
///
/// The scheduler only depends on this contract: upload a payload, report
/// progress zero or more times, then settle exactly once. Any `Err` is
/// routed into the retry policy; a panic inside `upload` is treated as a
/// scheduler-level fault and rejects the surrounding `start()` call.
///
/// # Example
///
/// ```rust,ignore
/// use asset_courier::core::{ProgressReporter, StorageClient, UploadPayload};
/// use asset_courier::core::error::AppResult;
/// use asset_courier::util::AssetId;
///
/// struct BlobStore { bucket: String }
///
/// #[async_trait::async_trait]
/// impl StorageClient<PhotoUpload> for BlobStore {
///     async fn upload(
///         &self,
///         payload: PhotoUpload,
///         progress: ProgressReporter,
///     ) -> AppResult<AssetId> {
///         progress.report(0, "handshake");
///         let asset = self.put_object(&payload).await?;
///         progress.report(100, "finalize");
///         Ok(asset)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageClient<P>: Send + Sync + 'static
where
    P: UploadPayload,
{
    /// Transfer one payload, reporting progress along the way.
    async fn upload(&self, payload: P, progress: ProgressReporter) -> AppResult<AssetId>;
}
