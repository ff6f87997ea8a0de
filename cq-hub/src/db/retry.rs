//! Commit retry logic
//!
//! Transient persistence failures (locked database, briefly unavailable
//! storage) are retried with exponential backoff up to a generous ceiling.
//! Past the ceiling the operation surfaces `PersistenceUnavailable`, which
//! the API layer turns into a "progress not saved" warning rather than
//! silently losing data.

use std::time::{Duration, Instant};

use cq_common::{Error, Result};

fn is_transient(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let msg = db_err.to_string();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

/// Retry a commit with exponential backoff until `ceiling_ms` elapses.
///
/// Backoff starts at 10ms and doubles to a 1s cap. Non-transient errors
/// fail immediately without retry.
pub async fn retry_commit<F, Fut, T>(operation_name: &str, ceiling_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let ceiling = Duration::from_millis(ceiling_ms);
    let mut backoff_ms = 10u64;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Commit succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if is_transient(&err) => {
                let elapsed = start.elapsed();
                if elapsed >= ceiling {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        ceiling_ms,
                        "Commit retries exhausted"
                    );
                    return Err(Error::PersistenceUnavailable(format!(
                        "{} failed after {} attempts over {} ms",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Transient persistence failure, will retry"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let result = retry_commit("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn non_transient_error_fails_immediately() {
        let mut attempts = 0;
        let result: Result<i32> = retry_commit("test_op", 5000, || {
            attempts += 1;
            async move { Err(Error::Internal("boom".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn transient_error_exhausts_to_persistence_unavailable() {
        let result: Result<i32> = retry_commit("test_op", 30, || async {
            Err(Error::Database(sqlx::Error::Protocol(
                "database is locked".to_string(),
            )))
        })
        .await;

        assert!(matches!(result, Err(Error::PersistenceUnavailable(_))));
    }
}
