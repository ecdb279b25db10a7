// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Retry and backoff
//!
//! Persistence retries in the processing lines and the reconnect loop of the
//! subscription listener both draw their delays from a [`RetryStrategy`].

use std::future::Future;
use std::time::{Duration, Instant};

/// Retry strategy for operations
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// No retries
    None,
    /// Fixed number of retries with constant delay
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay between retries
        delay: Duration,
    },
    /// Exponential backoff
    ExponentialBackoff {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Initial delay
        initial_delay: Duration,
        /// Maximum delay
        max_delay: Duration,
        /// Multiplier for each attempt
        multiplier: f64,
    },
}

impl Default for RetryStrategy {
    /// Three retries starting at 50ms, doubling
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(50))
    }
}

impl RetryStrategy {
    /// Calculate delay for a given attempt number (0-indexed)
    ///
    /// Returns None if no more retries should be attempted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries() {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Delay for an attempt, ignoring the retry limit
    ///
    /// Used by loops that never give up, such as feed reconnects.
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay, .. } => *delay,
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let exponent = attempt.min(32) as i32;
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }

    /// Get maximum number of retries
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } | Self::ExponentialBackoff { max_retries, .. } => {
                *max_retries
            }
        }
    }

    /// Create a fixed retry strategy
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Create an exponential backoff strategy
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Same strategy with a different delay cap
    pub fn with_max_delay(self, max: Duration) -> Self {
        match self {
            Self::ExponentialBackoff {
                max_retries,
                initial_delay,
                multiplier,
                ..
            } => Self::ExponentialBackoff {
                max_retries,
                initial_delay,
                max_delay: max,
                multiplier,
            },
            other => other,
        }
    }
}

/// Result of a retry operation with metrics
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    /// The result value
    pub value: T,
    /// Number of attempts made
    pub attempts: u32,
    /// Total time spent retrying
    pub total_duration: Duration,
}

/// Final error after giving up
#[derive(Debug, Clone)]
pub struct RetryExhausted<E> {
    /// The error returned by the last attempt
    pub last_error: E,
    /// Number of attempts made
    pub attempts: u32,
}

/// Run an async operation until it succeeds, its error is not retryable,
/// or the strategy runs out of attempts.
///
/// # Example
///
/// ```
/// use sensorwatch::recovery::{retry_async, RetryStrategy};
/// use std::time::Duration;
///
/// let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// rt.block_on(async {
///     let strategy = RetryStrategy::fixed(3, Duration::from_millis(1));
///     let mut calls = 0;
///     let result = retry_async(&strategy, |_: &&str| true, || {
///         calls += 1;
///         let outcome = if calls < 3 { Err("busy") } else { Ok(calls) };
///         async move { outcome }
///     })
///     .await
///     .unwrap();
///     assert_eq!(result.value, 3);
///     assert_eq!(result.attempts, 3);
/// });
/// ```
pub async fn retry_async<T, E, F, Fut, P>(
    strategy: &RetryStrategy,
    is_retryable: P,
    mut operation: F,
) -> Result<RetryResult<T>, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                return Ok(RetryResult {
                    value,
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                })
            }
            Err(e) => {
                let delay = if is_retryable(&e) {
                    strategy.delay_for_attempt(attempt)
                } else {
                    None
                };
                match delay {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(RetryExhausted {
                            last_error: e,
                            attempts: attempt + 1,
                        })
                    }
                }
            }
        }
    }
}
