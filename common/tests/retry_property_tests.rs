// Property-based tests for the retry strategy

use common::retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    /// *For any* attempt below the limit, a delay exists; *for any* attempt
    /// at or above the limit, it does not.
    #[test]
    fn property_retry_limit_is_enforced(
        max_attempts in 1u32..50,
        attempt in 0u32..100,
    ) {
        let strategy = ExponentialBackoff::new(max_attempts);
        let delay = strategy.next_delay(attempt);

        if attempt < max_attempts {
            prop_assert!(delay.is_some());
        } else {
            prop_assert!(delay.is_none());
        }
        prop_assert_eq!(strategy.should_retry(attempt), attempt < max_attempts);
    }

    /// *For any* configuration, the delay never exceeds the configured cap
    /// plus its jitter allowance.
    #[test]
    fn property_delay_is_bounded(
        base in 1u64..60,
        cap in 60u64..3600,
        attempt in 1u32..40,
        jitter in 0.0f64..1.0,
    ) {
        let strategy = ExponentialBackoff::with_config(base, cap, jitter, 40);
        let delay = strategy.next_delay(attempt).unwrap();

        let max_ms = (cap * 1000) as f64 * (1.0 + jitter) + 1000.0;
        prop_assert!((delay.as_millis() as f64) <= max_ms);
        prop_assert!(delay >= Duration::from_secs(base.min(cap)));
    }

    /// *For any* attempt, the jitter-free backoff is nondecreasing in the
    /// attempt number.
    #[test]
    fn property_backoff_grows_monotonically(
        base in 1u64..60,
        cap in 60u64..3600,
        attempt in 1u32..30,
    ) {
        let strategy = ExponentialBackoff::with_config(base, cap, 0.0, 40);
        let current = strategy.next_delay(attempt).unwrap();
        let next = strategy.next_delay(attempt + 1).unwrap();
        prop_assert!(next >= current);
    }

    /// *For any* fixed-delay configuration, every allowed attempt waits the
    /// same amount.
    #[test]
    fn property_fixed_delay_is_constant(
        delay_secs in 1u64..600,
        max_attempts in 1u32..20,
        attempt in 0u32..20,
    ) {
        let delay = Duration::from_secs(delay_secs);
        let strategy = FixedDelay::new(delay, max_attempts);

        match strategy.next_delay(attempt) {
            Some(d) => {
                prop_assert!(attempt < max_attempts);
                prop_assert_eq!(d, delay);
            }
            None => prop_assert!(attempt >= max_attempts),
        }
    }
}
