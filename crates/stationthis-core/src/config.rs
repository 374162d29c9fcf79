//! Coordinator configuration
//!
//! Retry bounds are deliberately explicit and documented: submissions to
//! the execution engine get bounded attempts with exponential backoff, and
//! lost conditional writes on run records get a bounded number of
//! fresh-read retries. Nothing in the coordinator retries unboundedly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default submission attempts before a step is marked failed
pub(crate) const DEFAULT_MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Default retries for a run update that lost a conditional write
pub(crate) const DEFAULT_MAX_AGGREGATION_RETRIES: u32 = 3;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Submission attempts per step (including the first)
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,

    /// Initial delay before the first submission retry, in milliseconds
    #[serde(default = "default_submit_backoff_ms")]
    pub submit_backoff_ms: u64,

    /// Cap on the submission retry delay, in milliseconds
    #[serde(default = "default_submit_backoff_max_ms")]
    pub submit_backoff_max_ms: u64,

    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub submit_backoff_multiplier: f64,

    /// Add up to 25% random jitter to retry delays
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Fresh-read retries when a run update loses a conditional write
    #[serde(default = "default_max_aggregation_retries")]
    pub max_aggregation_retries: u32,
}

fn default_max_submit_attempts() -> u32 {
    DEFAULT_MAX_SUBMIT_ATTEMPTS
}

fn default_submit_backoff_ms() -> u64 {
    200
}

fn default_submit_backoff_max_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_aggregation_retries() -> u32 {
    DEFAULT_MAX_AGGREGATION_RETRIES
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: default_max_submit_attempts(),
            submit_backoff_ms: default_submit_backoff_ms(),
            submit_backoff_max_ms: default_submit_backoff_max_ms(),
            submit_backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            max_aggregation_retries: default_max_aggregation_retries(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the submission attempt bound
    #[must_use]
    pub fn with_max_submit_attempts(mut self, attempts: u32) -> Self {
        self.max_submit_attempts = attempts;
        self
    }

    /// Set the initial submission retry delay
    #[must_use]
    pub fn with_submit_backoff(mut self, delay: Duration) -> Self {
        self.submit_backoff_ms = delay.as_millis() as u64;
        self
    }

    /// Set the submission retry delay cap
    #[must_use]
    pub fn with_submit_backoff_max(mut self, delay: Duration) -> Self {
        self.submit_backoff_max_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the aggregation retry bound
    #[must_use]
    pub fn with_max_aggregation_retries(mut self, retries: u32) -> Self {
        self.max_aggregation_retries = retries;
        self
    }

    /// Delay before retrying submission attempt `attempt` (1-based)
    #[must_use]
    pub fn submit_delay(&self, attempt: u32) -> Duration {
        let base = self.submit_backoff_ms as f64
            * self.submit_backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.submit_backoff_max_ms as f64) as u64;

        let delay_ms = if self.jitter {
            capped + time_jitter(capped / 4)
        } else {
            capped
        };

        Duration::from_millis(delay_ms)
    }
}

/// Cheap jitter from the clock's sub-second noise, so the coordinator does
/// not need a random number generator dependency
fn time_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}
