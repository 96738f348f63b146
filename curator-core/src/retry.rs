//! Retry helper for transient remote failures.
//!
//! Exponential backoff with jitter, capped delay, bounded attempts. The
//! caller supplies the classifier so each transport decides what counts
//! as retryable.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{CuratorError, Result};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base for the exponential schedule: delay = base^attempt seconds.
    pub base_secs: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_secs: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), jittered by up to
    /// 25% to avoid thundering herds against a recovering service.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exact = self.base_secs.powi(attempt as i32);
        let capped = Duration::from_secs_f64(exact).min(self.max_delay);
        let jitter = rand::rng().random_range(0.0..=0.25);
        capped.mul_f64(1.0 + jitter).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, a non-retryable error surfaces, or the
/// attempt budget is exhausted.
pub async fn retry<T, F, Fut, C>(label: &str, policy: RetryPolicy, classify: C, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&CuratorError) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && classify(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{label} attempt {attempt}/{} failed ({err}); retrying in {:?}",
                    policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(1) >= Duration::from_secs(2));
        assert!(policy.delay_for(10) <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_secs: 0.0,
            max_delay: Duration::from_millis(1),
        };

        let result = retry("test", policy, CuratorError::is_transient, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CuratorError::Connection("refused".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_authentication() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            "test",
            RetryPolicy::default(),
            CuratorError::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CuratorError::Authentication("401".into())) }
            },
        )
        .await;

        assert!(matches!(result, Err(CuratorError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_secs: 0.0,
            max_delay: Duration::from_millis(1),
        };
        let result: Result<()> = retry("test", policy, CuratorError::is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CuratorError::Timeout("30s".into())) }
        })
        .await;

        assert!(matches!(result, Err(CuratorError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
