//! Configuration for the sync engines.

use std::time::Duration;

/// Configuration for listener reconnect behavior.
///
/// The delay for the n-th consecutive failure is
/// `min(base_delay * 2^(n-1), max_delay)`; the defaults produce the fixed
/// schedule 2, 4, 8, 16, 32, 60, 60, … seconds. The ceiling is a fixed cap,
/// not a reset: every further failure waits `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Ceiling applied to the exponential schedule.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates the contract schedule (2s base, 60s ceiling).
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Sets the delay after the first failure.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the schedule ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the re-attach following the `retry_count`-th
    /// consecutive failure (1-indexed).
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(30);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration shared by both engine types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Namespace key tagging every emitted lifecycle event.
    pub namespace: String,
    /// Listener reconnect configuration.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration with the contract retry schedule.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            retry: RetryConfig::new(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_fixed() {
        let config = RetryConfig::new();
        let delays: Vec<u64> = (1..=8)
            .map(|n| config.delay_for_retry(n).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn schedule_is_compressible() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50));

        assert_eq!(config.delay_for_retry(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(20));
        assert_eq!(config.delay_for_retry(3), Duration::from_millis(40));
        assert_eq!(config.delay_for_retry(4), Duration::from_millis(50));
        assert_eq!(config.delay_for_retry(20), Duration::from_millis(50));
    }

    #[test]
    fn large_retry_counts_do_not_overflow() {
        let config = RetryConfig::new();
        assert_eq!(config.delay_for_retry(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("profile")
            .with_retry(RetryConfig::new().with_max_delay(Duration::from_secs(10)));
        assert_eq!(config.namespace, "profile");
        assert_eq!(config.retry.max_delay, Duration::from_secs(10));
    }
}
