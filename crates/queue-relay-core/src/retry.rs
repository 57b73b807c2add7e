//! # Backoff Module
//!
//! Exponential backoff for repeated receive failures in the consumer loop.
//!
//! Empty polls use a fixed idle interval instead; this policy only governs how
//! quickly the consumer retries after the service or transport has failed, and
//! when it gives up.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for consecutive failures
///
/// # Examples
///
/// ```rust
/// use queue_relay_core::retry::BackoffPolicy;
/// use std::time::Duration;
///
/// // Default policy: 5 attempts, 1s initial, 60s max, 2.0x multiplier
/// let policy = BackoffPolicy::default();
///
/// // Custom policy
/// let policy = BackoffPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5), 1.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,

    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Exponential growth factor
    pub backoff_multiplier: f64,

    /// Whether to randomise delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Create a new backoff policy with ±25% jitter
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after the given failure (0-based).
    ///
    /// `initial * multiplier^attempt`, capped at `max_delay`, then jittered.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }
}

/// Tracks consecutive failures against a [`BackoffPolicy`]
#[derive(Debug, Clone, Default)]
pub struct FailureState {
    consecutive: u32,
}

impl FailureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the consecutive count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    /// Forget earlier failures after a success
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    /// Whether the policy still allows another attempt
    pub fn can_retry(&self, policy: &BackoffPolicy) -> bool {
        policy.should_retry(self.consecutive)
    }

    /// Delay before the next attempt
    pub fn next_delay(&self, policy: &BackoffPolicy) -> Duration {
        policy.calculate_delay(self.consecutive.saturating_sub(1))
    }
}

/// Durations as integer milliseconds in configuration files
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
