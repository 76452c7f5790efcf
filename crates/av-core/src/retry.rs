//! Retry-until-done combinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::task::Task;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How often a failing step is re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed delay between attempts, no jitter.
    pub backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Runs tasks produced by `factory` until one succeeds or the policy is
/// exhausted, in which case the last error is surfaced.
///
/// Each attempt is awaited as a subtask spanning the whole range, so the
/// returned task's progress stays monotonic while attempts restart at zero.
/// A cancelled attempt is not retried.
pub fn retry_until_done<T, F>(label: impl Into<String>, policy: RetryPolicy, mut factory: F) -> Task<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut() -> Task<T> + Send + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    Task::spawn(label, move |mut ctx| async move {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let child = factory();
            let error = match ctx.await_subtask(&child, 1.0).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_cancelled() || ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if attempt >= max_attempts {
                warn!(task = %ctx.label(), attempts = attempt, error = %error, "Giving up after last attempt");
                return Err(error);
            }

            warn!(
                task = %ctx.label(),
                attempt,
                max_attempts,
                error = %error,
                "Attempt failed, retrying"
            );
            if let Some(backoff) = policy.backoff {
                debug!(task = %ctx.label(), ?backoff, "Waiting before next attempt");
                ctx.sleep(backoff).await?;
            }
        }
    })
}
