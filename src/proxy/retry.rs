//! Bounded retry around a single endpoint's full check sequence
//!
//! Policy is a pure function of the failure tag: deterministic protocol
//! rejections are terminal, only timeouts and network errors earn another
//! attempt, with a short linear backoff between attempts so a
//! rate-limiting remote is not hammered.

use crate::proxy::models::FailureReason;
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Default attempt ceiling per endpoint
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff unit between attempts
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Attempt ceiling and backoff for one endpoint's check
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Drive `f` until it succeeds, fails terminally or runs out of
    /// attempts. Returns the last attempt's result and how many attempts
    /// ran; the reported measurement always belongs to that last attempt.
    pub async fn run<T, F, Fut>(&self, mut f: F) -> (Result<T, FailureReason>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FailureReason>>,
    {
        let mut attempt = 1;
        loop {
            match f(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(reason) if reason.is_retryable() && attempt < self.max_attempts => {
                    debug!(
                        "attempt {}/{} failed with {}, retrying",
                        attempt, self.max_attempts, reason
                    );
                    sleep(self.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(reason) => return (Err(reason), attempt),
            }
        }
    }
}
