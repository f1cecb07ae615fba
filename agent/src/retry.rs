use crate::Result;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff around a single collaborator call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Runs `operation` until it succeeds, fails permanently, or `max_retries`
    /// retries have been spent. Only transient errors are retried.
    pub async fn run<F, Fut, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) if !e.is_transient() || attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        call = what,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
