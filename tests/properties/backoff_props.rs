use proptest::prelude::*;

use codex_archive::retry::{RetryConfig, calculate_backoff};

fn policy(initial: f64, multiplier: f64, max_delay: f64, jitter: f64) -> RetryConfig {
    RetryConfig {
        enabled: true,
        max_attempts: 10,
        initial_delay: initial,
        multiplier,
        max_delay,
        jitter,
        seed: None,
    }
}

proptest! {
    #[test]
    fn backoff_never_exceeds_max_delay(
        attempt in 1u32..64,
        initial in 0.001f64..10.0,
        multiplier in 1.0f64..4.0,
        max_delay in 0.01f64..120.0,
        jitter in 0.0f64..=1.0,
    ) {
        let delay = calculate_backoff(attempt, &policy(initial, multiplier, max_delay, jitter));
        prop_assert!(delay >= 0.0);
        prop_assert!(delay <= max_delay);
    }

    #[test]
    fn backoff_without_jitter_is_monotonic(
        attempt in 1u32..40,
        initial in 0.001f64..10.0,
        multiplier in 1.0f64..4.0,
        max_delay in 0.01f64..120.0,
    ) {
        let config = policy(initial, multiplier, max_delay, 0.0);
        prop_assert!(calculate_backoff(attempt, &config) <= calculate_backoff(attempt + 1, &config));
    }

    #[test]
    fn seeded_jitter_is_reproducible(attempt in 1u32..20, seed in any::<u64>()) {
        let config = RetryConfig {
            seed: Some(seed),
            ..policy(1.0, 2.0, 32.0, 0.5)
        };
        prop_assert_eq!(calculate_backoff(attempt, &config), calculate_backoff(attempt, &config));
    }
}
