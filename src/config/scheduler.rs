//! Scheduler configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Concurrency and retry configuration for an upload scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of uploads in flight at once.
    pub max_concurrent: usize,
    /// Maximum number of retries per task; 0 makes the first failure
    /// terminal.
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds; the `n`-th retry waits
    /// `base_delay_ms * n`. 0 requeues failed tasks immediately.
    pub base_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Backoff base delay as a [`Duration`].
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
