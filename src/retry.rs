//! Retry policy for media fetches
//!
//! Retries are driven by an explicit [`RetryState`]: every failed attempt is
//! fed to [`RetryState::record_failure`], which answers with either a delay to
//! wait before the next attempt or the [`FailureReason`] to give up with.
//!
//! - rate limits wait for the server-specified duration (optionally capped)
//! - other transient errors wait a short fixed delay, optionally jittered
//! - permanent errors fail immediately
//!
//! # Example
//!
//! ```no_run
//! use media_harvest::config::RetryConfig;
//! use media_harvest::error::{FailureReason, SourceError};
//! use media_harvest::retry::fetch_with_retry;
//!
//! # async fn example() -> Result<(), FailureReason> {
//! let config = RetryConfig::default();
//! let bytes = fetch_with_retry(&config, || async {
//!     // Your fetch here
//!     Ok::<u64, SourceError>(1024)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{FailureReason, SourceError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (rate limits, connection resets, timeouts) should return `true`.
/// Permanent failures (missing message, unsupported media) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Wait demanded by the remote before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. } | SourceError::Transport(_) => true,
            SourceError::NotFound(_) | SourceError::Unsupported(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { wait } => Some(*wait),
            _ => None,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again
    Retry(Duration),
    /// Stop and report the item as failed
    GiveUp(FailureReason),
}

/// Attempt bookkeeping for a single operation
#[derive(Clone, Debug)]
pub struct RetryState {
    max_attempts: u32,
    attempts_made: u32,
    last_error: Option<String>,
}

impl RetryState {
    /// Allow `max_attempts` attempts in total (at least one)
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts_made: 0,
            last_error: None,
        }
    }

    /// Attempts made so far
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Attempts still allowed
    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_made)
    }

    /// Message of the most recent failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a failed attempt and decide how to continue
    pub fn record_failure<E>(&mut self, error: &E, config: &RetryConfig) -> RetryDecision
    where
        E: IsRetryable + std::fmt::Display,
    {
        self.attempts_made += 1;
        let message = error.to_string();
        self.last_error = Some(message.clone());

        if !error.is_retryable() {
            return RetryDecision::GiveUp(FailureReason::Fetch(message));
        }
        if self.attempts_left() == 0 {
            return RetryDecision::GiveUp(FailureReason::RetriesExhausted {
                attempts: self.attempts_made,
                last_error: message,
            });
        }

        let delay = match error.retry_after() {
            Some(wait) => config
                .max_rate_limit_wait
                .map_or(wait, |cap| wait.min(cap)),
            None if config.jitter => add_jitter(config.transient_delay),
            None => config.transient_delay,
        };
        RetryDecision::Retry(delay)
    }
}

/// Execute an async fetch under the retry policy
///
/// Returns the successful value, or the [`FailureReason`] the item should be
/// reported with. Backoff sleeps only suspend this operation; other fetches
/// running alongside it are not held up.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, FailureReason>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut state = RetryState::new(config.max_retries);

    loop {
        match operation().await {
            Ok(result) => {
                if state.attempts_made() > 0 {
                    tracing::info!(
                        attempts = state.attempts_made() + 1,
                        "fetch succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => match state.record_failure(&e, config) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        error = %e,
                        attempt = state.attempts_made(),
                        max_attempts = config.max_retries,
                        delay = ?delay,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp(reason) => {
                    if e.is_retryable() {
                        tracing::error!(
                            error = %e,
                            attempts = state.attempts_made(),
                            "fetch failed after all attempts exhausted"
                        );
                    } else {
                        tracing::warn!(error = %e, "fetch failed with non-retryable error");
                    }
                    return Err(reason);
                }
            },
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
