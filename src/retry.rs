//! Explicit retry strategy.
//!
//! Call sites wrap the operation they want retried:
//!
//! ```no_run
//! use rwisp::config::RetryPolicy;
//! use rwisp::error::ConnectError;
//! use rwisp::retry::with_retry;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ConnectError> {
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! let value = with_retry(&policy, "probe", || async { Ok::<_, ConnectError>(42) }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use log::{error, warn};

use crate::config::RetryPolicy;
use crate::error::ConnectError;

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached. Returns the last error in the latter cases.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    "{} failed: {}. Attempt {} of {}",
                    label, e, attempt, max_attempts
                );
                attempt += 1;
                tokio::time::sleep(policy.delay()).await;
            }
            Err(e) => {
                if e.is_retryable() && max_attempts > 1 {
                    error!("{} failed after {} attempts: {}", label, max_attempts, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = with_retry(&fast(3), "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConnectError>(7)
            }
        })
        .await
        .expect("success");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = with_retry(&fast(3), "op", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConnectError::ConnectTimeout(1))
                } else {
                    Ok(1)
                }
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry(&fast(2), "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConnectError::ConnectTimeout(1))
            }
        })
        .await
        .expect_err("exhausted");
        assert!(matches!(err, ConnectError::ConnectTimeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let _ = with_retry(&fast(5), "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConnectError::SessionClosed)
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_ssh_transport_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry(&fast(3), "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConnectError::Ssh2Error(
                    async_ssh2_tokio::Error::SshError(russh::Error::IO(std::io::Error::from(
                        std::io::ErrorKind::ConnectionRefused,
                    ))),
                ))
            }
        })
        .await
        .expect_err("refused every time");
        assert!(matches!(err, ConnectError::Ssh2Error(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
