//! Bounded retry for one logical request.
//!
//! The controller is an explicit loop over an attempt counter: attempt `k`
//! runs, and if it fails with a retryable error the loop sleeps
//! `base_delay * k` before attempt `k + 1`. Attempts never overlap. The
//! cancellation token is raced against every attempt and every sleep, so a
//! cancelled request stops at the next suspension point and reports
//! [`RequestFailure::Cancelled`] without running anything else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::classify::offline_error;
use crate::connectivity::Connectivity;
use crate::error::{ClassifiedError, ErrorKind, RequestFailure};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, used for non-idempotent methods.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Unknown failures get one extra attempt at most.
    fn retries_for(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::Unknown => self.max_retries.min(1),
            _ => self.max_retries,
        }
    }
}

/// A failed attempt that was followed by a retry.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub error: ClassifiedError,
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RequestFailure>,
    /// Attempts actually started.
    pub attempts: u32,
    pub history: Vec<RetryAttempt>,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, RequestFailure> {
        self.result
    }
}

#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    connectivity: Arc<dyn Connectivity>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, connectivity: Arc<dyn Connectivity>) -> Self {
        Self { policy, connectivity }
    }

    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            connectivity: Arc::clone(&self.connectivity),
        }
    }

    /// Runs `operation` until it succeeds, fails for good, or `cancel` fires.
    /// The operation receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut attempt = 1;
        let mut history = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return finish(Err(RequestFailure::Cancelled), attempt - 1, history);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return finish(Err(RequestFailure::Cancelled), attempt, history);
                }
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => return finish(Ok(value), attempt, history),
                Err(error) if !error.is_local() && !self.connectivity.is_online() => {
                    tracing::debug!(attempt, kind = ?error.kind(), "failure while offline, treating as network error");
                    offline_error("You appear to be offline. Check your connection.".to_string())
                }
                Err(error) => error,
            };

            let retries_used = attempt - 1;
            if !error.is_retryable() || retries_used >= self.policy.retries_for(error.kind()) {
                tracing::debug!(attempt, kind = ?error.kind(), "giving up");
                return finish(Err(RequestFailure::Failed(error)), attempt, history);
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = ?error.kind(),
                status = error.source_status(),
                "request failed, retrying"
            );
            history.push(RetryAttempt { attempt, delay, error });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return finish(Err(RequestFailure::Cancelled), attempt, history);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn finish<T>(result: Result<T, RequestFailure>, attempts: u32, history: Vec<RetryAttempt>) -> RetryOutcome<T> {
    RetryOutcome {
        result,
        attempts,
        history,
    }
}
