//! Bounded per-page retry with exponential backoff.
//!
//! Blob stores return transient 5xx/timeout errors under concurrent load, and
//! an encoder can trip over a momentary allocation failure. Each page gets
//! `max_retries` extra attempts; the wait doubles every time
//! (`retry_backoff_ms * 2^(attempt-1)`), so with 500 ms and 3 retries the
//! sequence is 500 ms → 1 s → 2 s. When the budget is spent the last error is
//! returned together with the number of attempts made.

use crate::config::IngestConfig;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Retry budget for one page operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Result of an operation that eventually succeeded.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    /// Attempts that failed before the successful one.
    pub retries: u32,
}

/// The budget ran out; `error` is from the final attempt.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Run `op` until it succeeds or the policy's budget is spent.
///
/// `op` receives the 0-based attempt number. `on_retry` is called with the
/// 1-based retry number and the error that triggered it, before sleeping.
pub async fn with_retries<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    mut on_retry: impl FnMut(u32, &E),
) -> Result<Retried<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    retries: attempt,
                })
            }
            Err(error) if attempt < policy.max_retries => {
                attempt += 1;
                let backoff = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {} failed — {}; retry {}/{} after {}ms",
                    label,
                    attempt,
                    error,
                    attempt,
                    policy.max_retries,
                    backoff.as_millis()
                );
                on_retry(attempt, &error);
                sleep(backoff).await;
            }
            Err(error) => {
                return Err(Exhausted {
                    attempts: attempt + 1,
                    error,
                })
            }
        }
    }
}
