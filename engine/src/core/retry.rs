//! # guestrs Retry Policy
//!
//! File: engine/src/core/retry.rs
//!
//! ## Overview
//!
//! Network access to a guest is not a stable thing, so several operations are
//! retried: file-transfer primitives get exactly one retry, and session
//! bootstrap stages (reachability, management connect, shell warm-up,
//! environment cache) get a bounded number of attempts with a fixed delay.
//!
//! `RetryPolicy` makes this explicit instead of swallowing failures: the
//! caller supplies the operation and a predicate deciding which `GuestError`s
//! are worth another attempt. Sleeping goes through `tokio::time`, so tests
//! can drive the policy under a paused clock.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guestrs_engine::core::retry::RetryPolicy;
//! use guestrs_engine::core::error::{GuestError, Result};
//! use std::time::Duration;
//!
//! # async fn probe() -> Result<()> { Ok(()) }
//! # async fn example() -> Result<()> {
//! RetryPolicy::bounded(50, Duration::from_secs(5))
//!     .run("reachability probe", || probe(), GuestError::is_transient)
//!     .await
//!     .map_err(|e| e.into_startup("ping"))?;
//! # Ok(())
//! # }
//! ```
//!
use crate::core::error::GuestError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay used by the single transient retry around file-transfer primitives.
pub const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

/// The last error of an operation whose attempts were exhausted (or whose
/// error was not retryable).
#[derive(Debug)]
pub struct RetryError {
    pub attempts: u32,
    pub last_error: GuestError,
}

impl RetryError {
    /// Converts exhaustion of a bootstrap stage into a fatal startup failure.
    pub fn into_startup(self, stage: &str) -> GuestError {
        GuestError::Startup {
            stage: stage.to_string(),
            attempts: self.attempts,
            last_error: Box::new(self.last_error),
        }
    }

    /// Drops the attempt count and returns the underlying error.
    pub fn into_inner(self) -> GuestError {
        self.last_error
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts (clamped to at least 1) and a fixed delay.
    #[must_use]
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// One retry after `delay`: two attempts in total.
    #[must_use]
    pub fn once(delay: Duration) -> Self {
        Self::bounded(2, delay)
    }

    /// No retry at all.
    #[must_use]
    pub fn never() -> Self {
        Self::bounded(1, Duration::ZERO)
    }

    /// Runs `operation` until it succeeds, the predicate rejects an error, or
    /// the attempts are used up.
    pub async fn run<T, F, Fut, P>(
        &self,
        operation_name: &str,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GuestError>>,
        P: Fn(&GuestError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(operation = operation_name, attempt, error = %e, "Operation failed, no more retries");
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}
