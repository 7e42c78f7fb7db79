/// Backoff policy and poll loop for asynchronous CA-side state transitions
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{AcmeError, Result};
use crate::types::CancelToken;

/// Exponential backoff with a cap and proportional jitter.
///
/// `delay(0)` is the initial delay; every further attempt doubles it up
/// to `max_delay_ms`, then jitter of `±jitter * delay` is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1)` applied to each delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = (self.initial_delay_ms as f64) * 2f64.powi(attempt.min(16) as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let jittered = if self.jitter > 0.0 {
            let f = rand::rng().random_range(-self.jitter..=self.jitter);
            capped * (1.0 + f)
        } else {
            capped
        };
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Outcome of one poll attempt.
pub enum Attempt<T> {
    /// The awaited state was reached
    Ready(T),
    /// Still pending, try again after a backoff delay
    Pending,
}

/// Re-run `f` until it reports `Ready`, an error, or the total elapsed
/// time would exceed `timeout`.
///
/// The cancellation token is checked before every attempt and before
/// every sleep. Errors from `f` propagate immediately; only `Pending`
/// results are retried.
pub async fn poll_until<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancelToken,
    what: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        cancel.check()?;
        if let Attempt::Ready(value) = f().await? {
            return Ok(value);
        }

        let delay = policy.delay(attempt);
        if start.elapsed() + delay >= timeout {
            return Err(AcmeError::timeout(format!(
                "{}: still pending after {:?}",
                what,
                start.elapsed()
            )));
        }

        tracing::debug!("{}: pending, retry in {:?} (attempt {})", what, delay, attempt + 1);
        cancel.check()?;
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: 0.0,
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..6 {
            let d = policy.delay(attempt).as_millis() as f64;
            let base = (1_000f64 * 2f64.powi(attempt as i32)).min(10_000.0);
            assert!(d >= base * 0.8 - 1.0, "delay {} below jitter floor", d);
            assert!(d <= base * 1.2 + 1.0, "delay {} above jitter ceiling", d);
        }
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let policy = RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
        };
        let cancel = CancelToken::new();
        let mut remaining = 3;
        let result = poll_until(&policy, Duration::from_secs(5), &cancel, "test", || {
            let ready = remaining == 0;
            remaining -= if ready { 0 } else { 1 };
            async move {
                if ready {
                    Ok(Attempt::Ready(42))
                } else {
                    Ok(Attempt::Pending)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let policy = RetryPolicy {
            initial_delay_ms: 5,
            max_delay_ms: 5,
            jitter: 0.0,
        };
        let cancel = CancelToken::new();
        let result: Result<()> =
            poll_until(&policy, Duration::from_millis(20), &cancel, "test", || async {
                Ok(Attempt::Pending)
            })
            .await;
        assert!(matches!(result, Err(AcmeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_poll_until_cancelled() {
        let policy = RetryPolicy::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<()> =
            poll_until(&policy, Duration::from_secs(5), &cancel, "test", || async {
                Ok(Attempt::Pending)
            })
            .await;
        assert!(matches!(result, Err(AcmeError::Cancelled)));
    }
}
