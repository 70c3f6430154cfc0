//! Bounded retry with exponential backoff and explicit cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, HttpError};

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1`, where `attempt` counts from 1.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.initial_backoff_ms as f64 * factor;
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_backoff_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped as u64)
    }
}

/// Flag an outer owner raises to stop a retry loop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for HttpError {
    /// Server errors, timeouts and throttling are retried. Other client
    /// errors are final.
    fn is_retryable(&self) -> bool {
        let status = self.status.as_u16();
        status >= 500 || status == 408 || status == 429
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::KeyValue(_) | Self::Body(_))
    }
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        if let Some(err) = self.downcast_ref::<HttpError>() {
            return err.is_retryable();
        }
        if let Some(err) = self.downcast_ref::<Error>() {
            return err.is_retryable();
        }
        true
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
///
/// `signal` is checked before every attempt and after every sleep.
///
/// # Errors
///
/// The last error `op` returned, or [`Error::Cancelled`] converted into `E`
/// once `signal` is raised.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    signal: &CancelSignal,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<Error> + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if signal.is_cancelled() {
            return Err(Error::Cancelled.into());
        }
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= max_attempts || !err.is_retryable() {
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
        if signal.is_cancelled() {
            return Err(Error::Cancelled.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use http::StatusCode;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(20), Duration::from_millis(5_000));
    }

    #[test]
    fn policy_fields_default_individually() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 7}"#).unwrap();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff_ms, 100);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Cell::new(0);
        let result: Result<u32, HttpError> = retry(&fast(), &CancelSignal::new(), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(HttpError::new(StatusCode::SERVICE_UNAVAILABLE))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), HttpError> = retry(&fast(), &CancelSignal::new(), || {
            calls.set(calls.get() + 1);
            async { Err(HttpError::new(StatusCode::BAD_GATEWAY)) }
        })
        .await;
        assert_eq!(result.unwrap_err().status, StatusCode::BAD_GATEWAY);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn client_errors_are_final() {
        let calls = Cell::new(0);
        let result: Result<(), HttpError> = retry(&fast(), &CancelSignal::new(), || {
            calls.set(calls.get() + 1);
            async { Err(HttpError::new(StatusCode::NOT_FOUND)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let signal = CancelSignal::new();
        let calls = Cell::new(0);
        let result: Result<(), Error> = retry(&fast(), &signal, || {
            calls.set(calls.get() + 1);
            signal.cancel();
            async { Err(Error::Database("locked".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let signal = CancelSignal::new();
        signal.cancel();
        let result: Result<(), Error> =
            retry(&fast(), &signal, || async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
