//! Bounded retry with exponential backoff.
//!
//! [`retry_with_policy`] drives an operation that reports each attempt as an
//! [`Attempt`]. The operation decides what is retryable, and may perform
//! remediation before asking for another attempt. Time is read through a
//! [`Clock`] so tests can run the loop against [`ManualClock`] without sleeping.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProviderError;

/// Backoff and deadline settings for [`retry_with_policy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total wall-clock budget, measured from the first attempt.
    pub timeout: Duration,
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60),
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// The default policy with a different total budget.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The operation finished.
    Done(T),
    /// The operation should be tried again after a backoff delay.
    Retry(ProviderError),
    /// The operation failed and must not be retried.
    Abort(ProviderError),
}

/// Source of time for the retry loop.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time for tests: sleeping advances the clock instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed_nanos: AtomicU64,
    sleeps: AtomicUsize,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A clock at virtual time zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_nanos: AtomicU64::new(0),
            sleeps: AtomicUsize::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Virtual time passed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Number of sleeps performed.
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Run `f` until it returns [`Attempt::Done`] or [`Attempt::Abort`].
///
/// Between retries the loop sleeps per `policy`, never past the deadline. Once
/// the deadline has passed the last retryable error is returned inside
/// [`ProviderError::DeadlineExceeded`]. A timeout too large to represent as an
/// [`Instant`] means no deadline. If `cancel` fires at any point, including in
/// the middle of an attempt, the loop stops with [`ProviderError::Cancelled`]
/// and the attempt's future is dropped.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = clock.now().checked_add(policy.timeout);
    let mut interval = policy.initial_interval;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(operation, attempts));
        }

        attempts += 1;
        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(operation, attempts)),
            attempt = f() => attempt,
        };
        let last = match attempt {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(err),
            Attempt::Retry(err) => err,
        };

        let wait = match deadline {
            Some(deadline) => {
                let now = clock.now();
                if now >= deadline {
                    return Err(ProviderError::DeadlineExceeded(format!(
                        "{} did not complete within {:?} ({} attempts): {}",
                        operation, policy.timeout, attempts, last
                    )));
                }
                interval.min(deadline - now)
            },
            None => interval,
        };
        debug!(
            operation,
            attempts,
            wait_ms = wait.as_millis() as u64,
            error = %last,
            "Retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(operation, attempts)),
            () = clock.sleep(wait) => {},
        }

        interval = policy.next_interval(interval);
    }
}

fn cancelled(operation: &str, attempts: u32) -> ProviderError {
    ProviderError::Cancelled(format!("{} after {} attempts", operation, attempts))
}
