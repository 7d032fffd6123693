//! Deadlines for blocking backend calls

use crate::error::{QuarryError, Result};
use std::time::Duration;

/// Run blocking work on the blocking pool under a deadline
///
/// On timeout the work keeps running detached and its result is discarded;
/// the caller gets `Timeout` and may retry.
pub async fn run_blocking<T, F>(operation: &str, timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            tracing::error!("{} task failed: {}", operation, join_error);
            Err(QuarryError::Internal(format!(
                "{} task failed: {}",
                operation, join_error
            )))
        }
        Err(_) => {
            tracing::warn!("{} timed out after {:?}", operation, timeout);
            Err(QuarryError::timeout(operation, timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_result() {
        let value = run_blocking("add", Duration::from_secs(1), || Ok(2 + 2))
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result = run_blocking("sleep", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;

        match result {
            Err(QuarryError::Timeout { operation, after_ms }) => {
                assert_eq!(operation, "sleep");
                assert_eq!(after_ms, 10);
                assert!(QuarryError::timeout("sleep", 10).kind().is_retryable());
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_internal() {
        let result: Result<()> = run_blocking("boom", Duration::from_secs(1), || {
            panic!("invariant broken");
        })
        .await;
        assert!(matches!(result, Err(QuarryError::Internal(_))));
    }
}
