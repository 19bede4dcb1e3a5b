//! Bounded retry with jittered exponential backoff.
//!
//! Every fetch goes through [`retry_with_backoff`]. The delay before retry
//! `n` (0-indexed) is `base_delay * 2^n + uniform(0, jitter)`, capped at
//! `max_delay` before jitter is added. When the attempts run out the last
//! error is handed back to the caller.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Retry policy for a single fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of the random extra delay in milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Cap for the exponential part in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential part of the delay before retry `attempt` (0-indexed).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Full delay before retry `attempt`, jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            (rand::random::<f64>() * (self.jitter_ms as f64 + 1.0)) as u64
        } else {
            0
        };
        self.base_delay_for_attempt(attempt) + Duration::from_millis(jitter.min(self.jitter_ms))
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy is exhausted.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{label}: succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                log::warn!("{label}: giving up after attempt {attempt}: {err}");
                return Err(err);
            }
            Err(err) => {
                if !policy.should_retry(attempt) {
                    log::warn!("{label}: exhausted {attempt} attempts: {err}");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed, retrying in {}ms: {err}",
                    policy.max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
