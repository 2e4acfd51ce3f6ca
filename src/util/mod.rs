//! Shared utilities.

pub mod ids;
pub mod telemetry;

pub use ids::{AssetId, OwnerId, TaskId};
pub use telemetry::init_tracing;
