// Retry strategy with exponential backoff and jitter

use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating redelivery delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before the next attempt; None when attempts are exhausted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Total number of attempts allowed
    fn max_attempts(&self) -> u32;

    /// Whether another attempt is allowed after `attempt` attempts
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

/// Exponential backoff with jitter.
///
/// Sequence without jitter: 5s, 15s, 45s, ... capped at 30 minutes. Jitter
/// spreads simultaneous redeliveries apart.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    max_delay_secs: u64,
    /// Jitter fraction in [0.0, 1.0]
    jitter_factor: f64,
    max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 1800, // 30 minutes
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_config(
        base_delay_secs: u64,
        max_delay_secs: u64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    fn base_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.min(20); // 3^21 overflows any realistic cap anyway
        let delay = self
            .base_delay_secs
            .saturating_mul(3_u64.saturating_pow(exponent));
        delay.min(self.max_delay_secs)
    }

    fn with_jitter_ms(&self, base_delay_secs: u64) -> u64 {
        let base_delay_ms = base_delay_secs * 1000;
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return base_delay_ms;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let base = self.base_delay(attempt.saturating_sub(1));
        Some(Duration::from_millis(self.with_jitter_ms(base)))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Fixed delay strategy (testing and simple deployments)
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 0.0, 10);

        assert_eq!(strategy.base_delay(0), 5);
        assert_eq!(strategy.base_delay(1), 15);
        assert_eq!(strategy.base_delay(2), 45);
        assert_eq!(strategy.base_delay(3), 135);
        assert_eq!(strategy.base_delay(4), 405);
        assert_eq!(strategy.base_delay(5), 1215);
        // Capped at max_delay
        assert_eq!(strategy.base_delay(6), 1800);
        assert_eq!(strategy.base_delay(12), 1800);
    }

    #[test]
    fn test_retry_limit_enforcement() {
        let strategy = ExponentialBackoff::new(10);

        for attempt in 0..10 {
            assert!(
                strategy.next_delay(attempt).is_some(),
                "Should allow retry at attempt {}",
                attempt
            );
        }

        assert!(strategy.next_delay(10).is_none());
        assert!(strategy.next_delay(11).is_none());
    }

    #[test]
    fn test_should_retry_uses_max_attempts() {
        let strategy = ExponentialBackoff::new(3);
        assert!(strategy.should_retry(0));
        assert!(strategy.should_retry(2));
        assert!(!strategy.should_retry(3));
        assert!(!strategy.should_retry(4));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 0.1, 10);

        // Delay for the first attempt is 5s plus up to 10% jitter
        for _ in 0..50 {
            let delay = strategy.next_delay(1).unwrap().as_millis();
            assert!(
                (5000..=5500).contains(&delay),
                "Delay {}ms out of jitter range",
                delay
            );
        }
    }

    #[test]
    fn test_jitter_adds_randomness() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 0.1, 10);

        let delays: Vec<u128> = (0..20)
            .map(|_| strategy.next_delay(1).unwrap().as_millis())
            .collect();
        let first = delays[0];
        assert!(
            delays.iter().any(|&d| d != first),
            "Expected jitter variation, all samples were {}ms",
            first
        );
    }

    #[test]
    fn test_jitter_factor_clamping() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 1.5, 10);
        assert_eq!(strategy.jitter_factor, 1.0);

        let strategy = ExponentialBackoff::with_config(5, 1800, -0.5, 10);
        assert_eq!(strategy.jitter_factor, 0.0);
    }

    #[test]
    fn test_fixed_delay_strategy() {
        let delay = Duration::from_secs(10);
        let strategy = FixedDelay::new(delay, 5);

        for attempt in 0..5 {
            assert_eq!(strategy.next_delay(attempt), Some(delay));
        }
        assert_eq!(strategy.next_delay(5), None);
    }
}
