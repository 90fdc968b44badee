//! Bounded retry for remote operations
//!
//! Every error is treated as transient: the operation is attempted up to
//! `max_attempts` times and the final outcome is handed back to the caller
//! instead of being raised.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// Fixed-count retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per unit of work, including the first
    pub max_attempts: u32,

    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

/// A failed attempt, as reported to the failure hook
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub message: String,
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct Attempted<T> {
    /// Attempts actually made
    pub attempts: u32,

    /// Value of the successful attempt or the last error
    pub result: Result<T>,
}

impl<T> Attempted<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and no delay
    pub fn fixed(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
        }
    }

    /// Builder-style delay setter
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// `op` receives the 1-based attempt number. `on_failure` is awaited after
    /// every failed attempt, including the last one.
    pub async fn run<T, F, Fut, H, HFut>(
        &self,
        operation: &str,
        mut op: F,
        mut on_failure: H,
    ) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(AttemptFailure) -> HFut,
        HFut: Future<Output = ()>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        attempts: attempt,
                        result: Ok(value),
                    }
                }
                Err(e) => {
                    warn!(
                        %operation,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    on_failure(AttemptFailure {
                        attempt,
                        max_attempts,
                        message: e.to_string(),
                    })
                    .await;
                    last_error = Some(e);

                    if attempt < max_attempts && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Attempted {
            attempts: max_attempts,
            result: Err(last_error.unwrap_or_else(|| Error::Internal {
                message: format!("{} failed after {} attempts", operation, max_attempts),
            })),
        }
    }
}
