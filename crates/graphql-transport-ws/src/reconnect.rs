//! Exponential backoff between reconnection attempts.

use std::time::Duration;

use rand::Rng;

/// Parameters of the reconnect delay sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay doubled on every attempt before jitter is added.
    pub base_delay: Duration,
    /// Lower bound of every delay.
    pub min_delay: Duration,
    /// Upper bound of every delay.
    pub max_delay: Duration,
    /// Smallest random jitter added to the exponential part.
    pub jitter_min: Duration,
    /// Largest random jitter added to the exponential part (exclusive).
    pub jitter_max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter_min: Duration::from_millis(300),
            jitter_max: Duration::from_millis(3000),
        }
    }
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Base reconnect delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.min_delay {
            return Err("Max reconnect delay must be >= min reconnect delay".to_string());
        }
        if self.jitter_max < self.jitter_min {
            return Err("Max reconnect jitter must be >= min reconnect jitter".to_string());
        }
        Ok(())
    }
}

/// Unbounded sequence of reconnect delays.
///
/// Call `n` (0-based) yields `clamp(2^n * base + jitter, min, max)` where the
/// jitter is drawn uniformly from `[jitter_min, jitter_max)`. The number of
/// calls is the retry counter; start a fresh generator to reset it.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a generator starting at attempt 0.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay in the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = calculate_backoff(self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_delay())
    }
}

pub(crate) fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let base = config.base_delay.as_millis() as f64;
    // 2^64 ms is already far beyond any cap.
    let exponent = 2f64.powi(attempt.min(64) as i32);
    let jitter = jitter_millis(config);
    let min = config.min_delay.as_millis() as f64;
    let max = config.max_delay.as_millis() as f64;

    let delay = (base * exponent + jitter).clamp(min, max);
    Duration::from_millis(delay as u64)
}

fn jitter_millis(config: BackoffConfig) -> f64 {
    let low = config.jitter_min.as_millis() as u64;
    let high = config.jitter_max.as_millis() as u64;
    if high <= low {
        return low as f64;
    }
    rand::rng().random_range(low..high) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, min_ms: u64, max_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(base_ms),
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    #[test]
    fn test_calculate_backoff_without_jitter_is_deterministic() {
        let config = no_jitter(100, 100, 1000);

        assert_eq!(calculate_backoff(config, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(config, 1), Duration::from_millis(200));
        assert_eq!(calculate_backoff(config, 2), Duration::from_millis(400));
        assert_eq!(calculate_backoff(config, 3), Duration::from_millis(800));
        assert_eq!(calculate_backoff(config, 4), Duration::from_millis(1000));
    }

    #[test]
    fn test_default_delays_stay_within_bounds() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig::default());
        for delay in backoff.by_ref().take(200) {
            assert!(delay >= Duration::from_millis(1000), "{delay:?} below floor");
            assert!(delay <= Duration::from_millis(10_000), "{delay:?} above cap");
        }
        assert_eq!(backoff.attempts(), 200);
    }

    #[test]
    fn test_first_default_delay_includes_jitter() {
        for _ in 0..100 {
            let delay = calculate_backoff(BackoffConfig::default(), 0);
            assert!(delay >= Duration::from_millis(1300));
            assert!(delay < Duration::from_millis(4000));
        }
    }

    #[test]
    fn test_large_attempts_saturate_at_cap() {
        let config = BackoffConfig::default();
        assert_eq!(calculate_backoff(config, 10), Duration::from_millis(10_000));
        assert_eq!(calculate_backoff(config, u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_fresh_generator_resets_counter() {
        let config = no_jitter(1000, 1000, 10_000);
        let mut backoff = ExponentialBackoff::new(config);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4000));

        let mut backoff = ExponentialBackoff::new(config);
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = BackoffConfig::default();
        config.max_delay = Duration::from_millis(10);
        assert_eq!(
            config.validate().unwrap_err(),
            "Max reconnect delay must be >= min reconnect delay"
        );

        let mut config = BackoffConfig::default();
        config.jitter_min = Duration::from_secs(5);
        assert_eq!(
            config.validate().unwrap_err(),
            "Max reconnect jitter must be >= min reconnect jitter"
        );

        assert!(BackoffConfig::default().validate().is_ok());
    }
}
