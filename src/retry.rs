//! Bounded exponential-backoff retry engine.
//!
//! One engine serves every caller; what counts as a transient failure is
//! decided by a predicate the caller passes in, so the transport and the
//! database backend can each supply their own recoverable-error class.
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::retry::{Backoff, Retrier};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let retrier = Retrier::new(Backoff::default());
//! let cancel = CancellationToken::new();
//! let result = retrier
//!     .run_if(&cancel, || async { Err::<(), _>(std::io::Error::other("down")) }, |e| {
//!         e.kind() == std::io::ErrorKind::ConnectionRefused
//!     })
//!     .await;
//! assert!(result.is_err());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default growth factor between retries.
pub const DEFAULT_MULTIPLIER: f64 = 3.0;

/// Default ceiling for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay() -> Duration {
    DEFAULT_INITIAL_DELAY
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired while waiting or during an attempt.
    #[error("operation cancelled")]
    Cancelled,

    /// The error was outside the recoverable class; no retry was made.
    #[error("{0}")]
    Permanent(#[source] E),

    /// Every attempt failed with a recoverable error.
    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The last error returned by the operation, if any attempt completed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Permanent(e) | Self::Exhausted { source: e, .. } => Some(e),
        }
    }

    /// Borrow the last error returned by the operation.
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Cancelled => None,
            Self::Permanent(e) | Self::Exhausted { source: e, .. } => Some(e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Backoff policy: `delay(n) = min(max_delay, initial_delay * multiplier^n)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Growth factor applied per retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Delay to wait after failed attempt `n` (zero-based).
    pub fn delay(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Context passed to the retry observer before each retry.
pub struct RetryEvent<'a> {
    /// Number of attempts that have failed so far.
    pub attempt: u32,
    /// How long the engine will wait before the next attempt.
    pub delay: Duration,
    /// The error from the failed attempt.
    pub error: &'a dyn fmt::Display,
}

impl fmt::Debug for RetryEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEvent")
            .field("attempt", &self.attempt)
            .field("delay", &self.delay)
            .field("error", &format_args!("{}", self.error))
            .finish()
    }
}

type Observer = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Retry executor.
///
/// Cheap to clone; clones share the observer.
#[derive(Clone)]
pub struct Retrier {
    backoff: Backoff,
    on_retry: Option<Observer>,
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("backoff", &self.backoff)
            .field("observer", &self.on_retry.is_some())
            .finish()
    }
}

impl Retrier {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            on_retry: None,
        }
    }

    /// Install a callback invoked before every retry.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `op`, treating every error as recoverable.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(cancel, op, |_| true).await
    }

    /// Run `op`, retrying only errors for which `recoverable` returns true.
    ///
    /// At most `max_attempts` invocations are made. Cancellation aborts both
    /// the in-flight attempt and any pending backoff wait.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        recoverable: P,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !recoverable(&err) {
                return Err(RetryError::Permanent(err));
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.backoff.delay(attempt - 1);
            if let Some(observer) = &self.on_retry {
                observer(&RetryEvent {
                    attempt,
                    delay,
                    error: &err,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_backoff(max_attempts: u32) -> Backoff {
        Backoff::new(
            max_attempts,
            Duration::from_millis(10),
            2.0,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(3));
        assert_eq!(backoff.delay(2), Duration::from_secs(5));
        assert_eq!(backoff.delay(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_recoverable_runs_max_attempts() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(fast_backoff(4));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retrier
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_recoverable_runs_once() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(fast_backoff(5));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retrier
            .run_if(
                &cancel,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) }
                },
                |e: &io::Error| e.kind() == io::ErrorKind::ConnectionRefused,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let observed = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&observed);
        let retrier = Retrier::new(fast_backoff(3)).with_observer(move |event| {
            seen.store(event.attempt, Ordering::SeqCst);
        });
        let cancel = CancellationToken::new();

        let value = retrier
            .run(&cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(io::Error::from(io::ErrorKind::UnexpectedEof))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_backoff_wait() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(Backoff::new(
            10,
            Duration::from_secs(60),
            1.0,
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = retrier
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls_op() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<io::Error>> = Retrier::new(Backoff::default())
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_retry() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let retrier = Retrier::new(fast_backoff(3)).with_observer(move |event| {
            seen.lock().unwrap().push(format!("{event:?}"));
        });

        let result: Result<(), _> = retrier
            .run(&CancellationToken::new(), || async {
                Err(io::Error::other("connection refused"))
            })
            .await;
        assert!(result.is_err());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("attempt: 1"));
        assert!(events[0].contains("connection refused"));
        assert!(events[1].contains("attempt: 2"));
    }
}
