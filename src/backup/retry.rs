//! Bounded retry with exponential backoff.
//!
//! The same policy wraps a whole pipeline run (connect through upload) and,
//! independently, each single cloud upload call.

use crate::backup::result_error::result::Result;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

static DEFAULT_MAX_ATTEMPTS: u32 = 3;
static DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
static DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
static DEFAULT_MULTIPLIER: u32 = 2;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RetryPolicy {
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_INITIAL_BACKOFF)]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_MAX_BACKOFF)]
    pub max_backoff: Duration,
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MULTIPLIER)]
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// A policy that retries the same number of times without sleeping.
    pub fn without_backoff(max_attempts: u32) -> Self {
        Self::builder()
            .max_attempts(max_attempts)
            .initial_backoff(Duration::ZERO)
            .max_backoff(Duration::ZERO)
            .build()
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub fn retry<T, F>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!("{what} failed after {attempt} attempt(s)");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "{what} attempt {attempt}/{max_attempts} failed, retrying in {delay:?}: {e}"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::{Error, ErrorKind};

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::without_backoff(3);
        let mut seen = vec![];

        let res = policy.retry("op", |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(Error::connection("refused"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(res.unwrap(), "done");
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_retry_returns_last_error_after_exhaustion() {
        let policy = RetryPolicy::without_backoff(3);
        let mut calls = 0;

        let err = policy
            .retry("op", |attempt| -> Result<()> {
                calls += 1;
                Err(Error::backup(format!("attempt {attempt}")))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.kind(), ErrorKind::Backup);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[test]
    fn test_invalid_argument_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;

        let err = policy
            .retry("op", |_| -> Result<()> {
                calls += 1;
                Err(Error::invalid_argument("no destination"))
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_retry_policy_deserialization() {
        let policy: RetryPolicy =
            serde_yml::from_str("max_attempts: 5\ninitial_backoff: 500ms\n").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
        assert!(policy.validate().is_ok());
    }
}
