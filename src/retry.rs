//! Bounded polling with optional exponential backoff.
//!
//! [`poll_until`] repeatedly runs a check until it reports
//! [`Check::Ready`] or the policy's total timeout elapses, in which case it
//! returns [`LifecycleError::Timeout`] carrying the last observation. Used by
//! the DNS verifier; any other "wait until X" loop should go through here
//! rather than hand-rolled sleeps.

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::LifecycleError;

/// Interval, backoff and deadline for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// Multiplier applied to the interval after each pending check.
    pub backoff: f64,
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Constant interval until `timeout`.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            backoff: 1.0,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = factor.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Delay before check number `attempt + 1` (attempts count from 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let secs = self.interval.as_secs_f64() * self.backoff.powi(exp);
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.max_interval))
            .unwrap_or(self.max_interval)
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T> {
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

/// Run `check` until it is ready or `policy.timeout` elapses.
///
/// A check returning `Err` aborts immediately; transient failures should
/// be reported as [`Check::Pending`] by the caller.
pub async fn poll_until<T, F, Fut>(what: &str, policy: &RetryPolicy, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check<T>>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let last_observed = match check().await? {
            Check::Ready(value) => {
                tracing::debug!(what, attempt, "condition met");
                return Ok(value);
            }
            Check::Pending(observed) => observed,
        };

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(LifecycleError::Timeout {
                what: what.to_string(),
                waited: elapsed,
                last_observed,
            }
            .into());
        }

        let delay = policy.delay_for(attempt).min(policy.timeout - elapsed);
        tracing::debug!(
            what,
            attempt,
            observed = %last_observed,
            delay_ms = delay.as_millis() as u64,
            "condition not met yet"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let p = RetryPolicy::fixed(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = RetryPolicy::fixed(Duration::from_secs(1), Duration::from_secs(600))
            .with_backoff(2.0, Duration::from_secs(8));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(9), Duration::from_secs(8));
    }

    #[test]
    fn test_huge_backoff_saturates_at_max_interval() {
        let p = RetryPolicy::fixed(Duration::from_secs(15), Duration::from_secs(600))
            .with_backoff(1e30, Duration::from_secs(120));
        assert_eq!(p.delay_for(2), Duration::from_secs(120));
        assert_eq!(p.delay_for(40), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_ready_after_some_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(5), Duration::from_secs(2));
        let mut calls = 0;
        let value = poll_until("counter", &policy, || {
            calls += 1;
            let n = calls;
            async move {
                if n >= 3 {
                    Ok(Check::Ready(n))
                } else {
                    Ok(Check::Pending(format!("n={}", n)))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_observation() {
        let policy = RetryPolicy::fixed(Duration::from_millis(5), Duration::from_millis(30));
        let err = poll_until::<(), _, _>("never", &policy, || async {
            Ok(Check::Pending("still nothing".to_string()))
        })
        .await
        .unwrap_err();

        match err.downcast_ref::<LifecycleError>() {
            Some(LifecycleError::Timeout {
                what,
                last_observed,
                ..
            }) => {
                assert_eq!(what, "never");
                assert_eq!(last_observed, "still nothing");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_error_aborts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(5), Duration::from_secs(5));
        let started = Instant::now();
        let err = poll_until::<(), _, _>("broken", &policy, || async {
            Err(anyhow::anyhow!("resolver exploded"))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("resolver exploded"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
