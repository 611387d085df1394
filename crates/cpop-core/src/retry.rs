//! Bounded retry combinator
//!
//! Policy (how many times, how long to wait) is data; which errors are worth
//! retrying is a predicate supplied by the caller.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// delay * (retry + 1)
    Linear,
    /// delay * 2^retry
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first (0 = run once)
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_retries,
            delay,
            backoff,
        }
    }

    /// Run once, never retry
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Backoff::Fixed)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(retry.saturating_add(1)),
            Backoff::Exponential => self.delay.saturating_mul(2u32.saturating_pow(retry)),
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent. The last error is returned as-is.
    pub async fn run<F, Fut, T, E, P>(&self, mut operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match operation(retry).await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries && is_retryable(&err) => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        attempt = retry + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(2), Backoff::Fixed)
    }
}
