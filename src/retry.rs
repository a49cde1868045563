//! Exponential backoff with jitter.
//!
//! `delay(n) = min(initial_delay * multiplier^(n-1), max_delay)`, optionally
//! perturbed by `±jitter * delay` and clamped back into `[0, max_delay]`.

use std::fmt::Display;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy. Delays are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub initial_delay: f64,
    #[serde(default)]
    pub multiplier: f64,
    #[serde(default)]
    pub max_delay: f64,
    /// Fraction of the delay used as the jitter amplitude, in `[0, 1]`.
    #[serde(default)]
    pub jitter: f64,
    /// Fixed seed for reproducible jitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            initial_delay: 1.0,
            multiplier: 2.0,
            max_delay: 32.0,
            jitter: 0.1,
            seed: None,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Number of attempts actually made under this policy.
    #[must_use]
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

/// Backoff in seconds before retry number `attempt` (1-based).
#[must_use]
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> f64 {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let base = (config.initial_delay * config.multiplier.powi(exponent)).min(config.max_delay);
    if !base.is_finite() || base <= 0.0 {
        return 0.0;
    }
    if config.jitter <= 0.0 {
        return base;
    }

    let unit: f64 = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ u64::from(attempt)).random_range(-1.0..=1.0),
        None => rand::rng().random_range(-1.0..=1.0),
    };
    (base + base * config.jitter * unit).clamp(0.0, config.max_delay)
}

/// Run `op`, retrying any error while the policy allows.
///
/// The last error is returned unchanged once attempts are exhausted. With
/// retry disabled exactly one attempt is made.
pub fn retry_with_backoff<T, E, F>(config: &RetryConfig, op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    retry_with_sleeper(config, |_| true, std::thread::sleep, op)
}

/// Like [`retry_with_backoff`], but only errors accepted by `should_retry`
/// are retried; everything else propagates on first occurrence.
pub fn retry_with_backoff_when<T, E, P, F>(
    config: &RetryConfig,
    should_retry: P,
    op: F,
) -> Result<T, E>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Result<T, E>,
{
    retry_with_sleeper(config, should_retry, std::thread::sleep, op)
}

/// Core retry loop with an injectable sleep function.
pub fn retry_with_sleeper<T, E, P, S, F>(
    config: &RetryConfig,
    should_retry: P,
    mut sleep: S,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    P: Fn(&E) -> bool,
    S: FnMut(Duration),
    F: FnMut() -> Result<T, E>,
{
    let attempts = config.effective_attempts();
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < attempts && should_retry(&err) => {
                let delay = calculate_backoff(attempt, config);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_secs = delay,
                    error = %err,
                    "operation failed, retrying"
                );
                sleep(Duration::from_secs_f64(delay));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fixed(initial: f64, multiplier: f64, max_delay: f64) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 4,
            initial_delay: initial,
            multiplier,
            max_delay,
            jitter: 0.0,
            seed: None,
        }
    }

    // ===== backoff =====

    #[test]
    fn test_backoff_sequence_without_jitter() {
        let config = fixed(1.0, 2.0, 4.0);
        let delays: Vec<f64> = (1..=4).map(|n| calculate_backoff(n, &config)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 4.0]);
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let config = RetryConfig {
            jitter: 0.5,
            ..fixed(1.0, 2.0, 4.0)
        };
        for attempt in 1..=10 {
            let delay = calculate_backoff(attempt, &config);
            assert!((0.0..=4.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_backoff_seeded_jitter_is_reproducible() {
        let config = RetryConfig {
            jitter: 0.3,
            seed: Some(42),
            ..fixed(1.0, 2.0, 32.0)
        };
        assert_eq!(calculate_backoff(3, &config), calculate_backoff(3, &config));
    }

    // ===== retry loop =====

    #[test]
    fn test_disabled_makes_exactly_one_attempt() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_sleeper(
            &RetryConfig::disabled(),
            |_| true,
            |_| panic!("must not sleep"),
            || {
                calls.set(calls.get() + 1);
                Err("boom".to_string())
            },
        );
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retries_until_success() {
        let calls = Cell::new(0);
        let mut slept = Vec::new();
        let result: Result<u32, String> = retry_with_sleeper(
            &fixed(1.0, 2.0, 4.0),
            |_| true,
            |d| slept.push(d.as_secs_f64()),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(format!("fail {}", calls.get()))
                } else {
                    Ok(7)
                }
            },
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(slept, vec![1.0, 2.0]);
    }

    #[test]
    fn test_exhaustion_returns_last_error_unchanged() {
        let calls = Cell::new(0);
        let mut sleeps = 0;
        let result: Result<(), String> = retry_with_sleeper(
            &fixed(0.0, 2.0, 0.0),
            |_| true,
            |_| sleeps += 1,
            || {
                calls.set(calls.get() + 1);
                Err(format!("attempt {}", calls.get()))
            },
        );
        assert_eq!(result.unwrap_err(), "attempt 4");
        assert_eq!(calls.get(), 4);
        assert_eq!(sleeps, 3);
    }

    #[test]
    fn test_predicate_stops_non_retryable() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_sleeper(
            &fixed(0.0, 2.0, 0.0),
            |err: &String| err.starts_with("transient"),
            |_| {},
            || {
                calls.set(calls.get() + 1);
                Err("validation".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
