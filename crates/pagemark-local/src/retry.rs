//! Bounded exponential-backoff retry for any fallible async operation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// Substrings (lowercase) that mark a failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "429",
    "500",
    "503",
    "timeout",
    "timed out",
    "overloaded",
];

/// True if a failure message looks transient (rate limiting, overload, 5xx, timeouts).
pub fn is_retryable(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    RETRYABLE_MARKERS.iter().any(|k| m.contains(k))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Delay before retry `n` (1-based): `initial * 2^(n-1)`.
    pub fn delay_before_retry(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Run `op`, retrying transient failures.
    ///
    /// Fatal failures return after the first attempt; transient ones are retried up to
    /// `max_retries` times, after which the last error is returned.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retries = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let message = e.to_string();
                    if !is_retryable(&message) {
                        debug!(error = %message, "fatal failure, not retrying");
                        return Err(e);
                    }
                    if retries >= self.max_retries {
                        warn!(error = %message, attempts = retries + 1, "retry budget exhausted");
                        return Err(e);
                    }
                    retries += 1;
                    let delay = self.delay_before_retry(retries);
                    warn!(
                        error = %message,
                        "retry {}/{} after {}ms",
                        retries,
                        self.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
