//! Listener registry and snapshot notification.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::task::UploadTask;

/// Observer of task snapshots.
///
/// Invoked synchronously after every task mutation with the full current
/// task list, in submission order. Implementations must tolerate being
/// called from any worker; a panicking listener is caught and logged
/// without affecting uploads or other listeners.
pub trait ProgressListener: Send + Sync {
    /// Receive a read-only snapshot of all tracked tasks.
    fn on_snapshot(&self, tasks: &[UploadTask]);
}

impl<F> ProgressListener for F
where
    F: Fn(&[UploadTask]) + Send + Sync,
{
    fn on_snapshot(&self, tasks: &[UploadTask]) {
        self(tasks);
    }
}

/// Fan-out point for snapshot notifications.
///
/// Listeners are held behind a mutex but called outside it, so a slow or
/// reentrant listener cannot block registration.
#[derive(Default)]
pub struct ProgressHub {
    listeners: Mutex<Vec<Arc<dyn ProgressListener>>>,
}

impl ProgressHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. All registered listeners receive every
    /// subsequent notification.
    pub fn register(&self, listener: Arc<dyn ProgressListener>) {
        self.listeners.lock().push(listener);
    }

    /// Deliver a snapshot to every registered listener.
    pub fn notify(&self, snapshot: &[UploadTask]) {
        let listeners: Vec<Arc<dyn ProgressListener>> = self.listeners.lock().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_snapshot(snapshot)));
            if let Err(payload) = outcome {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "opaque panic payload".to_owned());
                tracing::error!(panic = %message, "progress listener panicked; continuing");
            }
        }
    }
}
