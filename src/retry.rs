//! Bounded exponential backoff for generation calls.
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::OpenAi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Attempts in total, the first one included.
    pub attempts: u32,
    pub min: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            min: Duration::from_secs(1),
            max: Duration::from_secs(20),
        }
    }
}

impl Backoff {
    pub fn from_config(cfg: &OpenAi) -> Self {
        Self {
            attempts: cfg.max_attempts.max(1),
            min: Duration::from_millis(cfg.backoff_min_ms),
            max: Duration::from_millis(cfg.backoff_max_ms),
        }
    }

    /// One attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Wait after the failed attempt number `attempt` (0-based): `min * 2^attempt`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.min
            .saturating_mul(1_u32 << attempt.min(16))
            .min(self.max)
    }

    /// Run `op` until it succeeds or the attempts are spent; the last error is
    /// returned as is.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.attempts => return Err(err),
                Err(err) => {
                    let wait = self.delay(attempt);
                    warn!(what, attempt = attempt + 1, ?wait, error = %err, "call failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
