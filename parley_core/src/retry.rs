//! Retry policy and backoff delay computation.
//!
//! The policy is plain data plus pure functions of `(attempt, policy)`; the
//! only impurity is the random jitter draw in [`RetryPolicy::delay_for_attempt`].
//! The async loop that applies it lives with the transport.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::Error;

/// HTTP statuses retried by [`RetryPolicy::standard`].
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 7] = [408, 409, 429, 500, 502, 503, 504];

/// Parameters controlling how often and how patiently a request is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// Build a policy, flooring every parameter into its valid range.
    ///
    /// `max_attempts` is at least 1, `backoff_multiplier` at least 1.0 and
    /// `jitter_ratio` within `[0, 1]`. Non-finite floats fall back to the
    /// lower bound.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter_ratio: f64,
        retryable_status_codes: impl IntoIterator<Item = u16>,
    ) -> Self {
        let backoff_multiplier = if backoff_multiplier.is_finite() {
            backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter_ratio,
            retryable_status_codes: retryable_status_codes.into_iter().collect(),
        }
    }

    /// Single attempt, never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    /// Three attempts, 0.4s base delay doubling up to 8s, 20% jitter.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(
            3,
            Duration::from_millis(400),
            Duration::from_secs(8),
            2.0,
            0.2,
            DEFAULT_RETRYABLE_STATUS_CODES,
        )
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub const fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    #[must_use]
    pub const fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    #[must_use]
    pub const fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Un-jittered delay to wait after `attempt` (1-based) has failed.
    ///
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let base = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = base * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Backoff delay shifted by `unit * jitter`, where `unit` is in `[-1, 1]`
    /// and jitter is `delay * jitter_ratio`. Never negative.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, unit: f64) -> Duration {
        let delay = self.backoff_delay(attempt).as_secs_f64();
        let unit = if unit.is_finite() {
            unit.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let jittered = (delay * self.jitter_ratio).mul_add(unit, delay).max(0.0);
        // Past `Duration::MAX`: wait the longest configured delay.
        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }

    /// Delay to sleep after `attempt` has failed, with a uniformly random jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unit = if self.jitter_ratio > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.jittered_delay(attempt, unit)
    }

    /// Whether `error` is a transient failure under this policy.
    #[must_use]
    pub fn is_retryable(&self, error: &Error) -> bool {
        match error {
            Error::Cancelled => false,
            Error::Network(_) => true,
            Error::BadResponse { status_code, .. } => {
                self.retryable_status_codes.contains(status_code)
            }
            _ => false,
        }
    }

    /// Whether another attempt should follow `attempts_made` failed ones.
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32, error: &Error) -> bool {
        attempts_made < self.max_attempts && self.is_retryable(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
