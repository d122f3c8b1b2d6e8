//! Retry policies for failed transfers

use bon::Builder;
use std::time::Duration;

use crate::config::RetryConfig;

/// Decides how long to wait before retrying a failed transfer.
///
/// `attempt` is the number of attempts that have failed so far for the
/// current item (1 after the first failure). Returning `None` gives up.
pub trait RetryPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff: `base * multiplier^(attempt - 1)`, capped at `max_delay`
#[derive(Debug, Clone, Builder)]
pub struct ExponentialBackoff {
    #[builder(default = Duration::from_millis(500))]
    base_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    max_delay: Duration,
    #[builder(default = 2.0)]
    multiplier: f64,
    /// Total attempts allowed per item; unbounded when `None`
    max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExponentialBackoff {
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return Some(self.max_delay);
        }

        Some(Duration::from_nanos(nanos.max(0.0).round() as u64))
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = ExponentialBackoff::builder()
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .build();

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(500), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unbounded_by_default() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.max_attempts(), None);
        assert!(policy.next_delay(u32::MAX).is_some());
    }

    #[test]
    fn test_ceiling_counts_total_attempts() {
        let policy = ExponentialBackoff::builder().max_attempts(3).build();

        assert!(policy.next_delay(1).is_some());
        assert!(policy.next_delay(2).is_some());
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            base_delay_ms: 200,
            max_delay_ms: 1000,
            multiplier: 3.0,
            max_attempts: Some(4),
        };

        let policy = ExponentialBackoff::from(&config);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(600)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(4), None);
    }
}
