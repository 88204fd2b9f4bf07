//! Exponential backoff with jitter.

use std::time::Duration;

use crate::RetryOptions;

/// Outcome of consulting the backoff policy after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffDecision {
    Stop,
    Sleep(Duration),
}

/// Bounds of the retry schedule of one call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl From<&RetryOptions> for BackoffPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self {
            max_attempts: options.max_attempts,
            min_delay: options.min_backoff,
            max_delay: options.max_backoff,
            factor: options.backoff_factor,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetryOptions::default())
    }
}

impl BackoffPolicy {
    /// Decides what to do after the zero-based `attempt` failed.
    pub fn next(&self, attempt: u32) -> BackoffDecision {
        self.next_with_sample(attempt, 0.5 + fastrand::f64() * 0.5)
    }

    /// Same as [`BackoffPolicy::next`] with the jitter sample supplied by the caller.
    ///
    /// `sample` is clamped to `[0.5, 1.0]`.
    pub fn next_with_sample(&self, attempt: u32, sample: f64) -> BackoffDecision {
        if attempt >= self.max_attempts {
            return BackoffDecision::Stop;
        }

        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(min);
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = min * factor.powi(exponent);
        let clamped = if grown.is_finite() { grown.min(max) } else { max };

        let sample = if sample.is_nan() { 1.0 } else { sample.clamp(0.5, 1.0) };
        let delay = (min + sample * (clamped - min)).clamp(min, max);

        BackoffDecision::Sleep(Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay))
    }
}

/// Functional form of [`BackoffPolicy::next`]: returns `(should_retry, delay)`.
pub fn next_delay(
    attempt: u32,
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
    factor: f64,
) -> (bool, Duration) {
    let policy = BackoffPolicy {
        max_attempts,
        min_delay,
        max_delay,
        factor,
    };
    match policy.next(attempt) {
        BackoffDecision::Stop => (false, Duration::ZERO),
        BackoffDecision::Sleep(delay) => (true, delay),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{next_delay, BackoffDecision, BackoffPolicy};

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn stops_once_attempts_are_spent() {
        let policy = policy(3);
        for attempt in 3..20 {
            assert_eq!(policy.next(attempt), BackoffDecision::Stop);
        }
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let policy = policy(0);
        assert_eq!(policy.next(0), BackoffDecision::Stop);
        let (retry, _) = next_delay(0, 0, Duration::from_secs(1), Duration::from_secs(2), 2.0);
        assert!(!retry);
    }

    #[test]
    fn delay_stays_within_bounds() {
        let policy = policy(64);
        for attempt in 0..64 {
            for _ in 0..20 {
                match policy.next(attempt) {
                    BackoffDecision::Sleep(delay) => {
                        assert!(delay >= policy.min_delay, "{delay:?} below min");
                        assert!(delay <= policy.max_delay, "{delay:?} above max");
                    }
                    BackoffDecision::Stop => panic!("attempt {attempt} must retry"),
                }
            }
        }
    }

    #[test]
    fn jitter_scales_range_above_min() {
        let policy = policy(5);
        // attempt 1: 4s * 3 = 12s, range above min is 8s.
        assert_eq!(
            policy.next_with_sample(1, 0.5),
            BackoffDecision::Sleep(Duration::from_secs(8))
        );
        assert_eq!(
            policy.next_with_sample(1, 1.0),
            BackoffDecision::Sleep(Duration::from_secs(12))
        );
        // attempt 4: 4s * 81 clamps to 60s.
        assert_eq!(
            policy.next_with_sample(4, 1.0),
            BackoffDecision::Sleep(Duration::from_secs(60))
        );
    }

    #[test]
    fn first_attempt_waits_min_delay() {
        let policy = policy(1);
        assert_eq!(
            policy.next_with_sample(0, 0.75),
            BackoffDecision::Sleep(Duration::from_secs(4))
        );
    }

    #[test]
    fn inverted_bounds_collapse_to_min() {
        let policy = BackoffPolicy {
            max_attempts: 2,
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            factor: 3.0,
        };
        assert_eq!(
            policy.next_with_sample(1, 1.0),
            BackoffDecision::Sleep(Duration::from_secs(10))
        );
    }

    #[test]
    fn functional_form_matches_policy() {
        let (retry, delay) = next_delay(
            0,
            2,
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
        );
        assert!(retry);
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(50));
    }
}
