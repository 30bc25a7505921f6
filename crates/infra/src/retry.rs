//! Compare-and-set retry loop with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use storekeep_core::Deadline;

use crate::error::{FulfillmentError, FulfillmentResult};

/// Backoff between optimistic-concurrency retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(1), Duration::from_millis(50))
    }
}

impl RetryPolicy {
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// No waiting between attempts (benchmarks, tests).
    pub fn immediate() -> Self {
        Self::exponential(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry `attempt` (0-indexed).
    ///
    /// `min(base * 2^attempt, max) * jitter`, jitter drawn from `[0.5, 1.0]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        capped.mul_f64(jitter)
    }
}

/// Run `op` until it stops failing with [`FulfillmentError::Conflict`].
///
/// A conflict means the snapshot `op` decided against was stale; every
/// attempt must re-read. Gives up with `Timeout` once `deadline` passes.
pub fn retry_on_conflict<T, F>(
    policy: &RetryPolicy,
    deadline: Deadline,
    operation: &str,
    mut op: F,
) -> FulfillmentResult<T>
where
    F: FnMut() -> FulfillmentResult<T>,
{
    let mut attempt = 0u32;
    loop {
        if deadline.is_expired() {
            return Err(FulfillmentError::Timeout(format!(
                "{operation}: deadline expired after {attempt} attempt(s)"
            )));
        }

        match op() {
            Err(FulfillmentError::Conflict(reason)) => {
                debug!(operation, attempt, %reason, "stale write, retrying");
                std::thread::sleep(deadline.clamp(policy.delay_for_attempt(attempt)));
                attempt = attempt.saturating_add(1);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_millis(10), Duration::from_millis(40));
        let first = policy.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(5) && first <= Duration::from_millis(10));
        for attempt in 2..40 {
            let d = policy.delay_for_attempt(attempt);
            assert!(d >= Duration::from_millis(20) && d <= Duration::from_millis(40));
        }
        assert_eq!(RetryPolicy::immediate().delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let mut calls = 0;
        let result = retry_on_conflict(&RetryPolicy::immediate(), Deadline::none(), "test", || {
            calls += 1;
            if calls < 3 {
                Err(FulfillmentError::Conflict("stale".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: FulfillmentResult<()> =
            retry_on_conflict(&RetryPolicy::immediate(), Deadline::none(), "test", || {
                calls += 1;
                Err(FulfillmentError::InvalidState("nope".to_string()))
            });
        assert!(matches!(result, Err(FulfillmentError::InvalidState(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn persistent_conflict_times_out() {
        let policy = RetryPolicy::exponential(Duration::from_millis(1), Duration::from_millis(2));
        let result: FulfillmentResult<()> = retry_on_conflict(
            &policy,
            Deadline::within(Duration::from_millis(20)),
            "test",
            || Err(FulfillmentError::Conflict("stale".to_string())),
        );
        assert!(matches!(result, Err(FulfillmentError::Timeout(_))));
    }
}
