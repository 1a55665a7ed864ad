//! Video repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::VideoRow;
use crate::database::retry::retry_on_busy;
use crate::domain::Video;

/// Video repository trait.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// All stored videos for a channel, used for crawl-time dedup.
    async fn videos_by_channel(&self, channel_id: i64) -> Result<Vec<Video>>;
    /// Upsert keyed by `(channel_url_id, url)`; returns the row id.
    async fn save_video(&self, video: &Video) -> Result<i64>;
}

/// SQLx implementation of [`VideoRepository`].
pub struct SqlxVideoRepository {
    pool: SqlitePool,
}

impl SqlxVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn videos_by_channel(&self, channel_id: i64) -> Result<Vec<Video>> {
        let rows = sqlx::query_as::<_, VideoRow>(
            "SELECT * FROM videos WHERE channel_id = ? ORDER BY id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VideoRow::into_domain).collect()
    }

    async fn save_video(&self, video: &Video) -> Result<i64> {
        let status = serde_json::to_string(&video.status)?;
        let metadata = video
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().to_rfc3339();

        retry_on_busy("save_video", || {
            let status = status.clone();
            let metadata = metadata.clone();
            let now = now.clone();
            async move {
                let id = sqlx::query_scalar::<_, i64>(
                    "INSERT INTO videos \
                     (channel_id, channel_url_id, url, title, upload_date, video_path, \
                      json_path, finished, was_skipped, download_status, metadata, \
                      created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT (channel_url_id, url) DO UPDATE SET \
                       title = excluded.title, \
                       upload_date = excluded.upload_date, \
                       video_path = excluded.video_path, \
                       json_path = excluded.json_path, \
                       finished = excluded.finished, \
                       was_skipped = excluded.was_skipped, \
                       download_status = excluded.download_status, \
                       metadata = excluded.metadata, \
                       updated_at = excluded.updated_at \
                     RETURNING id",
                )
                .bind(video.channel_id)
                .bind(video.channel_url_id)
                .bind(&video.url)
                .bind(&video.title)
                .bind(&video.upload_date)
                .bind(video.video_path.as_ref().map(|p| p.display().to_string()))
                .bind(video.json_path.as_ref().map(|p| p.display().to_string()))
                .bind(video.finished)
                .bind(video.was_skipped)
                .bind(&status)
                .bind(&metadata)
                .bind(video.created_at.to_rfc3339())
                .bind(&now)
                .fetch_one(&self.pool)
                .await?;
                Ok(id)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::crypto::PasswordCipher;
    use crate::database::repositories::channel::{ChannelRepository, SqlxChannelRepository};
    use crate::database::{init_pool, run_migrations};
    use crate::domain::{NewChannel, NewChannelUrl, VideoState};

    async fn setup() -> (SqlxVideoRepository, i64, i64) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let channels =
            SqlxChannelRepository::new(pool.clone(), PasswordCipher::from_secret("test"));
        let channel_id = channels
            .add_channel(&NewChannel {
                name: "demo".to_string(),
                urls: vec![NewChannelUrl {
                    url: "https://example.test/u/a".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        let channel = channels
            .get_by_ref(&crate::domain::ChannelRef::Id(channel_id))
            .await
            .unwrap();

        (
            SqlxVideoRepository::new(pool),
            channel_id,
            channel.urls[0].id,
        )
    }

    #[tokio::test]
    async fn save_is_an_upsert_on_url_identity() {
        let (repo, channel_id, url_id) = setup().await;

        let mut video = Video::discovered(channel_id, url_id, "https://example.test/v/1");
        let first_id = repo.save_video(&video).await.unwrap();

        video.title = Some("resolved title".to_string());
        video.finished = true;
        video.status.state = VideoState::Completed;
        let second_id = repo.save_video(&video).await.unwrap();
        assert_eq!(first_id, second_id);

        let videos = repo.videos_by_channel(channel_id).await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].title.as_deref(), Some("resolved title"));
        assert!(videos[0].finished);
        assert_eq!(videos[0].status.state, VideoState::Completed);
    }

    #[tokio::test]
    async fn videos_by_channel_only_returns_that_channel() {
        let (repo, channel_id, url_id) = setup().await;
        let video = Video::discovered(channel_id, url_id, "https://example.test/v/1");
        repo.save_video(&video).await.unwrap();

        assert_eq!(repo.videos_by_channel(channel_id).await.unwrap().len(), 1);
        assert!(repo.videos_by_channel(channel_id + 1).await.unwrap().is_empty());
    }
}
