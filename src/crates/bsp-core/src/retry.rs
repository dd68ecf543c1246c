//! Relaunch backoff for failed worker attempts
//!
//! When the coordinator decides a failed worker may be retried, it waits
//! [`RetryPolicy::calculate_delay`] before launching the next attempt. The
//! default relaunches immediately; jobs that share a flaky cluster can
//! configure exponential backoff with jitter:
//!
//! ```text
//! delay = initial_interval × backoff_factor ^ (attempt - 1)
//! delay = min(delay, max_interval)
//! if jitter: delay *= random(0.5..=1.5)
//! ```
//!
//! How many attempts a partition gets is a job setting
//! ([`JobConfig::max_attempts`](crate::config::JobConfig::max_attempts));
//! [`RetryState`] tracks the attempts made so far.
//!
//! ```rust
//! use bsp_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default()
//!     .with_initial_interval(0.5)
//!     .with_jitter(false);
//! assert_eq!(policy.calculate_delay(1), Duration::from_millis(500));
//! assert_eq!(policy.calculate_delay(2), Duration::from_secs(1));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff applied between worker attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each failed attempt
    pub backoff_factor: f64,

    /// Maximum delay in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Relaunch without waiting.
    pub fn immediate() -> Self {
        Self {
            initial_interval: 0.0,
            backoff_factor: 2.0,
            max_interval: 60.0,
            jitter: false,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before launching attempt `failed_attempt + 1`.
    ///
    /// `failed_attempt` is 1-based: the first launch of a worker is attempt 1.
    pub fn calculate_delay(&self, failed_attempt: u32) -> Duration {
        if self.initial_interval <= 0.0 || failed_attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped_delay = base_delay.min(self.max_interval);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_delay * rng.gen_range(0.5..=1.5)
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Reject intervals that cannot be turned into a delay.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("initial_interval", self.initial_interval),
            ("backoff_factor", self.backoff_factor),
            ("max_interval", self.max_interval),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a finite non-negative number, got {}", name, value));
            }
        }
        Ok(())
    }

    /// Whether an attempt that just failed may be followed by another.
    pub fn should_retry(&self, failed_attempt: u32, max_attempts: u32) -> bool {
        failed_attempt < max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Attempts made by one worker slot
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Current attempt number, 1-based once launched
    pub attempts: u32,

    /// Reason the last attempt failed
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a launch; returns the new attempt number.
    pub fn record_launch(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
