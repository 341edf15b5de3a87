// Retry bookkeeping for role mutations.
//
// The controller drives an explicit loop over RetryState instead of chaining
// callbacks; sleeping goes through the Sleeper port so tests never wait.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    /// Move to the next attempt. Returns false once every attempt has been used.
    pub fn begin_attempt(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Linear backoff: attempt × base.
    pub fn backoff(&self, base: Duration) -> Duration {
        base * self.attempt
    }

    pub fn last_error_or(&self, fallback: &str) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}
