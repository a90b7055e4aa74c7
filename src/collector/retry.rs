//! Bounded retry with a fixed delay between attempts.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::debug;

/// Returned when every permitted attempt failed, or the error was not retryable.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted<E: fmt::Display> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Pause after a failed attempt; never applied after the final one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `call` until it succeeds or the attempt budget is spent.
    ///
    /// On success returns the value with the number of attempts used.
    pub async fn run<T, E, F, Fut>(&self, call: F) -> Result<(T, u32), RetryExhausted<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(call, |_| true).await
    }

    /// Like [`run`](Self::run), but stops early when `should_retry` rejects an error.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        mut call: F,
        should_retry: P,
    ) -> Result<(T, u32), RetryExhausted<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt >= max_attempts || !should_retry(&e) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    debug!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Attempt failed, retrying in {:?}",
                        self.delay
                    );
                    time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
