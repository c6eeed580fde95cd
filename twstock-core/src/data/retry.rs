//! Fixed-backoff retry for period requests.

use super::provider::MarketFetchError;
use crate::config::FetchConfig;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Never zero.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient causes are retried. The closure receives the 1-based
    /// attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, MarketFetchError>
    where
        F: FnMut(u32) -> Result<T, MarketFetchError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.cause.is_transient() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "retrying request");
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "giving up on request");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::period::PeriodSpec;
    use crate::data::provider::FetchCause;
    use crate::domain::Market;

    fn err(cause: FetchCause) -> MarketFetchError {
        MarketFetchError::new(
            Market::Listed,
            "2330",
            PeriodSpec::Month { year: 2024, month: 1 },
            cause,
        )
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let mut calls = 0;
        let result = policy(3).run(|_| {
            calls += 1;
            if calls < 3 {
                Err(err(FetchCause::Timeout))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = policy(3).run(|_| {
            calls += 1;
            Err(err(FetchCause::Status(503)))
        });
        assert_eq!(result.unwrap_err().cause, FetchCause::Status(503));
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = policy(5).run(|_| {
            calls += 1;
            Err(err(FetchCause::NoData))
        });
        assert!(result.unwrap_err().is_no_data());
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _: Result<(), _> = policy(0).run(|_| {
            calls += 1;
            Err(err(FetchCause::Timeout))
        });
        assert_eq!(calls, 1);
    }
}
