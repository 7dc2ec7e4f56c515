// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retry with exponential backoff
//!
//! Delays follow `min(base * 2^attempt, cap)`: 1s, 2s, 4s with the default
//! policy. The cancellation token is checked before every attempt and while
//! sleeping between attempts; a cancelled run resolves to
//! [`RetryOutcome::Cancelled`] rather than an error. When retries run out the
//! last error is returned unchanged.

use crate::config::RetryPolicy;
use crate::error::SessionError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> RetryOutcome<T> {
    /// Collapse into a `Result`, mapping cancellation to [`SessionError::Cancelled`]
    pub fn into_result(self) -> Result<T, SessionError> {
        match self {
            RetryOutcome::Completed(value) => Ok(value),
            RetryOutcome::Cancelled => Err(SessionError::Cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryOutcome::Cancelled)
    }
}

/// Progress report handed to `on_attempt` before each backoff sleep
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// Number of the attempt about to run (the first retry is attempt 2)
    pub next_attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub error: &'a E,
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, exhausts the policy, or `cancel` fires.
    pub async fn run<T, E, F, Fut, C, A>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        is_retryable: C,
        mut on_attempt: A,
    ) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        A: FnMut(&RetryAttempt<'_, E>),
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(attempt = attempt + 1, "Retry loop cancelled before attempt");
                return Ok(RetryOutcome::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                debug!(error = %error, "Non-retryable error, giving up");
                return Err(error);
            }
            if attempt >= self.policy.max_retries {
                warn!(
                    attempts = max_attempts,
                    error = %error,
                    "🚨 Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            on_attempt(&RetryAttempt {
                next_attempt: attempt + 2,
                max_attempts,
                delay,
                error: &error,
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Retry loop cancelled during backoff");
                    return Ok(RetryOutcome::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    /// [`RetryExecutor::run`] with the session error classifier and no progress callback
    pub async fn run_session<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        self.run(cancel, operation, SessionError::is_retryable, |_| {})
            .await?
            .into_result()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Await `future` unless `cancel` fires first.
///
/// An in-flight remote call is dropped on cancellation instead of being
/// waited out.
pub async fn until_cancelled<T, Fut>(
    cancel: &CancellationToken,
    future: Fut,
) -> Result<T, SessionError>
where
    Fut: Future<Output = Result<T, SessionError>>,
{
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = future => result,
    }
}

/// Like [`until_cancelled`] with an optional wall-clock limit.
pub async fn until_cancelled_or_timeout<T, Fut>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    future: Fut,
) -> Result<T, SessionError>
where
    Fut: Future<Output = Result<T, SessionError>>,
{
    match timeout {
        Some(limit) => {
            until_cancelled(cancel, async move {
                tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
                    Err(SessionError::Timeout(format!(
                        "remote call exceeded {}ms",
                        limit.as_millis()
                    )))
                })
            })
            .await
        }
        None => until_cancelled(cancel, future).await,
    }
}
