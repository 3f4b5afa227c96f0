use crate::core::errors::{Result, StepflowError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for the engine and its worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on total engine iterations per session. Barrier polls
    /// count against the same ceiling, so a waiting session can never
    /// hang indefinitely.
    pub max_guard: u32,
    /// Poll cadence while the review barrier waits on pending extractions
    pub barrier_poll_interval: Duration,
    /// Maximum number of extraction workers running at once
    pub max_extraction_workers: usize,
    /// Consecutive verification visits with no queue progress tolerated
    /// before the engine reports a stalled session
    pub stall_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_guard: 25,
            barrier_poll_interval: Duration::from_millis(25),
            max_extraction_workers: 4,
            stall_threshold: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_guard == 0 {
            return Err(StepflowError::configuration_field(
                "max_guard must be greater than 0",
                "max_guard",
            ));
        }
        if self.barrier_poll_interval.is_zero() {
            return Err(StepflowError::configuration_field(
                "barrier_poll_interval must be greater than 0",
                "barrier_poll_interval",
            ));
        }
        if self.max_extraction_workers == 0 {
            return Err(StepflowError::configuration_field(
                "max_extraction_workers must be greater than 0",
                "max_extraction_workers",
            ));
        }
        if self.stall_threshold == 0 {
            return Err(StepflowError::configuration_field(
                "stall_threshold must be greater than 0",
                "stall_threshold",
            ));
        }
        Ok(())
    }

    /// Create tight limits for testing
    pub fn conservative() -> Self {
        Self {
            max_guard: 10,
            barrier_poll_interval: Duration::from_millis(10),
            max_extraction_workers: 2,
            stall_threshold: 2,
        }
    }
}
