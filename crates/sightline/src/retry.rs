//! Bounded retry with flat or incremental backoff.

use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between attempts. Never exponential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Linear { initial_ms: u64, step_ms: u64 },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn none() -> Self {
        Backoff::Fixed { delay_ms: 0 }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Linear {
                initial_ms,
                step_ms,
            } => Duration::from_millis(
                initial_ms + step_ms.saturating_mul(attempt.saturating_sub(1) as u64),
            ),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 1000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, AutomationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        self.run_until(label, AutomationError::is_retryable, op).await
    }

    /// Like `run`, but `should_retry` decides which errors are worth another attempt.
    pub async fn run_until<T, F, Fut, P>(
        &self,
        label: &str,
        should_retry: P,
        mut op: F,
    ) -> Result<T, AutomationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
        P: Fn(&AutomationError) -> bool,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", label, attempt, max);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max && should_retry(&e) => {
                    let delay = self.backoff.delay_after(attempt);
                    warn!(
                        "{} failed on attempt {}/{}: {}. Retrying in {:?}",
                        label, attempt, max, e, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
