//! Retry policy for node executions

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff applied when a node fails.
///
/// Timeouts count as failures. Structural errors (unknown fields, invalid
/// routes) are never retried because re-running the node cannot fix them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt `attempt + 1`, `attempt` starting at 1
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            // 0% to 25% on top of the capped delay
            capped * (1.0 + rng.gen_range(0.0..0.25))
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Run `op` until it succeeds, fails structurally, or attempts run out.
    pub async fn run<F, Fut, T>(&self, task: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(task = %task, attempts = attempt, "Task succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_structural() || attempt >= max_attempts => {
                    if attempt > 1 {
                        tracing::error!(task = %task, attempts = attempt, error = %e, "Task failed after all retry attempts");
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        task = %task,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Task failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Run `op` once, or under `policy` when one is configured
pub(crate) async fn with_retry<F, Fut, T>(policy: Option<&RetryPolicy>, task: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match policy {
        Some(policy) => policy.run(task, op).await,
        None => op().await,
    }
}
