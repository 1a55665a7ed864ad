//! Retry helper for SQLite lock contention.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use rand::random;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const BUSY_MAX_RETRIES: usize = 10;
const BUSY_BASE_DELAY_MS: u64 = 20;
const BUSY_MAX_DELAY_MS: u64 = 1500;

fn is_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Retry `op` with exponential backoff and jitter while SQLite reports the
/// database as busy or locked. Non-busy errors propagate immediately.
pub async fn retry_on_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_busy_error(&err) || attempt >= BUSY_MAX_RETRIES {
                    return Err(err);
                }

                let backoff_ms =
                    (BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt)).min(BUSY_MAX_DELAY_MS);
                let jitter_ms = random::<u64>() % (backoff_ms / 4 + 1);
                let delay = Duration::from_millis((backoff_ms + jitter_ms).min(BUSY_MAX_DELAY_MS));

                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    BUSY_MAX_RETRIES
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_busy_errors_propagate_immediately() {
        let mut calls = 0usize;
        let result: Result<()> = retry_on_busy("test", || {
            calls += 1;
            async { Err(Error::fatal("boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = retry_on_busy("test", || async { Ok(7usize) }).await.unwrap();
        assert_eq!(result, 7);
    }
}
