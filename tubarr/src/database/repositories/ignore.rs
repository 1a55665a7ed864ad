//! Ignore-list repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;

/// Per-channel set of URLs that must never be enqueued.
#[async_trait]
pub trait IgnoreRepository: Send + Sync {
    /// Idempotent batched insert.
    async fn add_ignore_urls(&self, channel_id: i64, urls: &[String]) -> Result<()>;
    async fn list_ignore_urls(&self, channel_id: i64) -> Result<Vec<String>>;
}

/// SQLx implementation of [`IgnoreRepository`].
pub struct SqlxIgnoreRepository {
    pool: SqlitePool,
}

impl SqlxIgnoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IgnoreRepository for SqlxIgnoreRepository {
    async fn add_ignore_urls(&self, channel_id: i64, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for url in urls {
            sqlx::query("INSERT OR IGNORE INTO ignore_urls (channel_id, url) VALUES (?, ?)")
                .bind(channel_id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_ignore_urls(&self, channel_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM ignore_urls WHERE channel_id = ? ORDER BY url")
                .bind(channel_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}
