use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::debug;

/// Floor for the delay between fetches; a zero interval would hammer the API.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

// Stand-in deadline when `timeout` is too large to add to `now`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// A resource status that eventually settles.
pub trait ReadyState {
    /// Ready, or failed for good.
    fn is_terminal(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Fetches `what` until it reaches a terminal state.
///
/// The terminal value is returned as-is, so an errored resource comes back
/// as `Ok` with its error status. Running out of time is a `Timeout` error;
/// an in-flight fetch is abandoned at the deadline.
pub async fn wait_for_ready<T, F, Fut>(what: &str, options: PollOptions, mut fetch: F) -> Result<T>
where
    T: ReadyState,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let now = Instant::now();
    let deadline = now
        .checked_add(options.timeout)
        .unwrap_or_else(|| now + FAR_FUTURE);
    let interval = options.interval.max(MIN_POLL_INTERVAL);
    let timed_out = || {
        CloudError::Timeout(format!(
            "{} not ready after {}s",
            what,
            options.timeout.as_secs_f64()
        ))
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let current = match timeout_at(deadline, fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(timed_out()),
        };
        if current.is_terminal() {
            debug!(resource = %what, attempts, "Resource settled");
            return Ok(current);
        }

        match Instant::now().checked_add(interval) {
            Some(next) if next < deadline => sleep_until(next).await,
            _ => return Err(timed_out()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum Status {
        Pending,
        Ready,
        Failed,
    }

    impl ReadyState for Status {
        fn is_terminal(&self) -> bool {
            !matches!(self, Status::Pending)
        }
    }

    fn fast() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_returns_once_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let status = wait_for_ready("db-1", fast(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n < 2 { Status::Pending } else { Status::Ready }) }
        })
        .await
        .unwrap();

        assert_eq!(status, Status::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_state_is_terminal() {
        let status = wait_for_ready("db-1", fast(), || async { Ok(Status::Failed) })
            .await
            .unwrap();
        assert_eq!(status, Status::Failed);
    }

    #[tokio::test]
    async fn test_times_out_instead_of_returning_stale_status() {
        let options = PollOptions {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        };
        let err = wait_for_ready("dpl_1", options, || async { Ok(Status::Pending) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(ref m) if m.contains("dpl_1")));
    }

    #[tokio::test]
    async fn test_hanging_fetch_is_cut_off() {
        let options = PollOptions {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        };
        let err = wait_for_ready("dpl_1", options, || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Status::Ready)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_zero_interval_is_throttled() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let options = PollOptions {
            interval: Duration::ZERO,
            timeout: Duration::from_millis(50),
        };
        let err = wait_for_ready("db-1", options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Status::Pending) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CloudError::Timeout(_)));
        assert!(calls.load(Ordering::SeqCst) <= 11);
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let options = PollOptions {
            interval: Duration::MAX,
            timeout: Duration::MAX,
        };
        let status = wait_for_ready("db-1", options, || async { Ok(Status::Ready) })
            .await
            .unwrap();
        assert_eq!(status, Status::Ready);

        let err = wait_for_ready("db-1", options, || async { Ok(Status::Pending) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let err = wait_for_ready::<Status, _, _>("db-1", fast(), || async {
            Err(CloudError::provider(500, "boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
