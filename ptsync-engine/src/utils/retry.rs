//! Named retry policies
//!
//! A run uses `fetch` (page walker) and `write` (batch writer); the
//! checkpoint store adds `checkpoint-lock` for SQLite lock contention. All
//! use a fixed pause between attempts and a bounded attempt count, and only
//! errors the caller marks as retryable are retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded fixed-pause retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Policy name for logging
    pub name: &'static str,
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,
    /// Pause between attempts
    pub pause: Duration,
}

/// Result of running an operation under a policy
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn new(name: &'static str, max_attempts: u32, pause: Duration) -> Self {
        Self {
            name,
            max_attempts: max_attempts.max(1),
            pause,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            policy = self.name,
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    if attempt >= self.max_attempts {
                        tracing::error!(
                            policy = self.name,
                            operation = operation_name,
                            attempt,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    tracing::warn!(
                        policy = self.name,
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        pause_ms = self.pause.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after pause"
                    );

                    tokio::time::sleep(self.pause).await;
                }
            }
        }
    }
}
