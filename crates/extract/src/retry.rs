use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Bounded retry for calls to the LLM and embedding services. Delays double
/// from `initial_backoff` up to `max_backoff`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// First failure is final.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Run `call` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempt cap is reached. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        retryable: impl Fn(&E) -> bool,
        mut call: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retry = 0;
        loop {
            let err = match call().await {
                Ok(value) => {
                    if retry > 0 {
                        info!(operation, attempts = retry + 1, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !retryable(&err) {
                return Err(err);
            }
            if retry >= self.max_retries {
                warn!(operation, attempts = retry + 1, error = %err, "Giving up");
                return Err(err);
            }

            retry += 1;
            let delay = self.backoff(retry);
            warn!(
                operation,
                retry,
                max_retries = self.max_retries,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Call failed, retrying"
            );
            sleep(delay).await;
        }
    }
}
