//! Retry with exponential backoff and additive jitter.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first call. Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Additive random jitter on top of the exponential delay. Never makes a
    /// delay negative and never pushes it past `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))` plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let capped = raw.clamp(0.0, self.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);

        if self.jitter && !delay.is_zero() {
            let jitter_ms = fastrand::u64(0..=(delay.as_millis() as u64 / 4).max(1));
            delay = (delay + Duration::from_millis(jitter_ms)).min(self.max_delay);
        }

        delay
    }
}

/// HTTP status codes worth retrying, shared by the adapters.
pub fn retriable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Runs `op` under the policy. Returns the first success, a non-retriable
/// failure immediately, or the last failure once the attempt budget is
/// exhausted. The attempt count is recorded on the error.
pub async fn execute<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                debug!(attempt, "call succeeded");
                return Ok(value);
            }
            Err(mut err) => {
                err.attempts = attempt;
                if !err.retriable {
                    debug!(attempt, error = %err.kind, "non-retriable failure");
                    return Err(err);
                }
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %err.kind, "retry budget exhausted");
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err.kind,
                    "retriable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::FetchErrorKind;

    fn policy_no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
        }
    }

    #[test]
    fn delays_double_and_cap_at_max() {
        let policy = policy_no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350)); // capped
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn delays_are_non_decreasing() {
        let policy = policy_no_jitter();
        let mut previous = Duration::ZERO;
        for attempt in 1..=8 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} regressed");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn zero_base_delay_clamps_to_zero() {
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            jitter: true,
            ..policy_no_jitter()
        };
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy_no_jitter()
        };
        for _ in 0..50 {
            for attempt in 1..=6 {
                assert!(policy.delay_for(attempt) <= policy.max_delay);
            }
        }
    }

    #[test]
    fn status_classification() {
        assert!(retriable_status(429));
        assert!(retriable_status(500));
        assert!(retriable_status(503));
        assert!(retriable_status(408));
        assert!(!retriable_status(401));
        assert!(!retriable_status(404));
        assert!(!retriable_status(200));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_within_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..policy_no_jitter()
        };

        let result = execute(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(FetchError::transient(FetchErrorKind::Timeout))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempt_count() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..policy_no_jitter()
        };

        let result: Result<(), _> = execute(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::transient(FetchErrorKind::RateLimited)) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.retriable);
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_failure_returns_immediately() {
        let calls = AtomicU32::new(0);
        let policy = policy_no_jitter();

        let result: Result<(), _> = execute(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FetchError::permanent(FetchErrorKind::Auth(
                    "bad key".to_string(),
                )))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.retriable);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
