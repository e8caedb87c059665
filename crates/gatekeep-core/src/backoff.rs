// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff with jitter.
//!
//! Maps a retry index and a [`RetryPolicy`] to a delay in milliseconds.
//! Jitter multiplies the capped delay by a uniform factor in `[0.5, 1.5)`
//! to desynchronize concurrent retries; the result never exceeds
//! `max_delay_ms`.

use crate::retry::RetryPolicy;

/// Lower bound of the jitter multiplier.
pub const JITTER_LOW: f64 = 0.5;

/// Upper bound (exclusive) of the jitter multiplier.
pub const JITTER_HIGH: f64 = 1.5;

/// Compute the delay before retry `attempt` (0-based) using the thread-local RNG.
#[must_use]
pub fn delay(attempt: u32, policy: &RetryPolicy) -> u64 {
    compute(attempt, policy, fastrand::f64)
}

/// Compute the delay before retry `attempt` (0-based) with a caller-supplied
/// random source.
///
/// Deterministic for a seeded `rng`.
#[must_use]
pub fn delay_with_rng(attempt: u32, policy: &RetryPolicy, rng: &mut fastrand::Rng) -> u64 {
    compute(attempt, policy, || rng.f64())
}

/// `sample` yields a uniform value in `[0, 1)`; it is only drawn when jitter is on.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn compute(attempt: u32, policy: &RetryPolicy, sample: impl FnOnce() -> f64) -> u64 {
    let max = policy.max_delay_ms as f64;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = policy.initial_delay_ms as f64 * policy.backoff_factor.powi(exponent);

    let capped = if raw.is_finite() && raw >= 0.0 {
        raw.min(max)
    } else {
        max
    };

    let jittered = if policy.jitter {
        capped * (JITTER_LOW + sample() * (JITTER_HIGH - JITTER_LOW))
    } else {
        capped
    };

    (jittered.floor() as u64).min(policy.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay_ms(100)
            .max_delay_ms(1_000)
            .jitter(false)
            .build()
    }

    #[test]
    fn test_first_retry_uses_initial_delay() {
        assert_eq!(delay(0, &no_jitter()), 100);
    }

    #[test]
    fn test_exponential_growth_until_cap() {
        let policy = no_jitter();
        let delays: Vec<u64> = (0..6).map(|n| delay(n, &policy)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_monotonic_without_jitter() {
        let policy = RetryPolicy::builder()
            .initial_delay_ms(7)
            .max_delay_ms(60_000)
            .backoff_factor(1.5)
            .jitter(false)
            .build();

        for n in 0..40 {
            assert!(delay(n + 1, &policy) >= delay(n, &policy), "attempt {n}");
        }
    }

    #[test]
    fn test_never_exceeds_max_delay() {
        let policy = RetryPolicy::default();
        let mut rng = fastrand::Rng::with_seed(7);

        for n in 0..200 {
            let d = delay_with_rng(n, &policy, &mut rng);
            assert!(d <= policy.max_delay_ms, "attempt {n} produced {d}");
        }

        // u32::MAX overflows the f64 power to infinity
        assert!(delay(u32::MAX, &policy) <= policy.max_delay_ms);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::builder()
            .initial_delay_ms(1_000)
            .max_delay_ms(100_000)
            .build();
        let mut rng = fastrand::Rng::with_seed(42);

        for _ in 0..500 {
            let d = delay_with_rng(0, &policy, &mut rng);
            assert!((500..1_500).contains(&d), "jittered delay {d} out of band");
        }
    }

    #[test]
    fn test_jitter_near_cap_is_clamped() {
        let policy = RetryPolicy::builder()
            .initial_delay_ms(1_000)
            .max_delay_ms(1_000)
            .build();
        let mut rng = fastrand::Rng::with_seed(3);

        for _ in 0..500 {
            assert!(delay_with_rng(5, &policy, &mut rng) <= 1_000);
        }
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let policy = RetryPolicy::default();
        let a = delay_with_rng(2, &policy, &mut fastrand::Rng::with_seed(99));
        let b = delay_with_rng(2, &policy, &mut fastrand::Rng::with_seed(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_delay_draws_from_thread_local_rng() {
        let policy = RetryPolicy::builder()
            .initial_delay_ms(1_000)
            .max_delay_ms(100_000)
            .build();

        fastrand::seed(11);
        let first: Vec<u64> = (0..8).map(|n| delay(n, &policy)).collect();
        fastrand::seed(11);
        let second: Vec<u64> = (0..8).map(|n| delay(n, &policy)).collect();

        assert_eq!(first, second);
        assert!((500..1_500).contains(&first[0]));
    }

    #[test]
    fn test_non_finite_factor_saturates_to_max() {
        let policy = RetryPolicy::builder()
            .backoff_factor(f64::NAN)
            .jitter(false)
            .build();
        assert_eq!(delay(1, &policy), policy.max_delay_ms);
    }
}
