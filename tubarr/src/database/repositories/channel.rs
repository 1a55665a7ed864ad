//! Channel repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::crypto::PasswordCipher;
use crate::database::models::ChannelRow;
use crate::database::retry::retry_on_busy;
use crate::domain::{
    Channel, ChannelAuth, ChannelRef, ChannelSettings, ChannelUrl, MetarrArgs, NewChannel,
    NotifyTarget,
};
use crate::{Error, Result};

/// Channel repository trait.
///
/// `update_settings_json` / `update_metarr_json` are the only way to change
/// the policy blobs: the mutator runs against the freshly-read blob inside a
/// transaction, so concurrent writers never clobber each other's fields and
/// unknown keys survive the round trip.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>>;
    async fn get_by_ref(&self, channel_ref: &ChannelRef) -> Result<Channel>;
    async fn add_channel(&self, new: &NewChannel) -> Result<i64>;
    async fn update_settings_json(
        &self,
        channel_ref: &ChannelRef,
        mutator: &(dyn for<'a> Fn(&'a mut ChannelSettings) + Send + Sync),
    ) -> Result<()>;
    async fn update_metarr_json(
        &self,
        channel_ref: &ChannelRef,
        mutator: &(dyn for<'a> Fn(&'a mut MetarrArgs) + Send + Sync),
    ) -> Result<()>;
    async fn update_channel_last_scan(&self, channel_id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn update_url_last_scan(&self, channel_url_id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Attach credentials to member URLs; passwords are encrypted at rest.
    async fn add_auth(&self, channel_id: i64, auth: &[(String, ChannelAuth)]) -> Result<()>;
    async fn add_notify_urls(&self, channel_id: i64, targets: &[NotifyTarget]) -> Result<()>;
    async fn delete_notify_urls(
        &self,
        channel_id: i64,
        urls: &[String],
        names: &[String],
    ) -> Result<()>;
    async fn list_notify_urls(&self, channel_id: i64) -> Result<Vec<NotifyTarget>>;
}

/// SQLx implementation of [`ChannelRepository`].
pub struct SqlxChannelRepository {
    pool: SqlitePool,
    cipher: PasswordCipher,
}

impl SqlxChannelRepository {
    pub fn new(pool: SqlitePool, cipher: PasswordCipher) -> Self {
        Self { pool, cipher }
    }

    async fn row_by_ref(
        conn: &mut sqlx::SqliteConnection,
        channel_ref: &ChannelRef,
    ) -> Result<ChannelRow> {
        let row = match channel_ref {
            ChannelRef::Id(id) => {
                sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
                    .bind(*id)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            ChannelRef::Name(name) => {
                sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            ChannelRef::Url(url) => {
                sqlx::query_as::<_, ChannelRow>(
                    "SELECT c.* FROM channels c \
                     JOIN channel_urls u ON u.channel_id = c.id WHERE u.url = ?",
                )
                .bind(url)
                .fetch_optional(&mut *conn)
                .await?
            }
        };
        row.ok_or_else(|| Error::not_found("Channel", channel_ref.to_string()))
    }

    async fn urls_for_channel(
        &self,
        conn: &mut sqlx::SqliteConnection,
        channel_id: i64,
    ) -> Result<Vec<ChannelUrl>> {
        let rows = sqlx::query_as::<_, crate::database::models::ChannelUrlRow>(
            "SELECT * FROM channel_urls WHERE channel_id = ? ORDER BY id",
        )
        .bind(channel_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut urls = Vec::with_capacity(rows.len());
        for row in rows {
            let password = match row.encrypted_password.as_deref() {
                Some(encrypted) if !encrypted.is_empty() => {
                    Some(self.cipher.decrypt(encrypted)?)
                }
                _ => None,
            };
            urls.push(row.into_domain(password)?);
        }
        Ok(urls)
    }

    async fn assemble(&self, conn: &mut sqlx::SqliteConnection, row: ChannelRow) -> Result<Channel> {
        let urls = self.urls_for_channel(conn, row.id).await?;
        row.into_domain(urls)
    }

    fn is_unique_violation(err: &sqlx::Error, needle: &str) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.message().contains(needle))
    }
}

#[async_trait]
impl ChannelRepository for SqlxChannelRepository {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;

        let mut channels = Vec::with_capacity(rows.len());
        for row in rows {
            channels.push(self.assemble(&mut conn, row).await?);
        }
        Ok(channels)
    }

    async fn get_by_ref(&self, channel_ref: &ChannelRef) -> Result<Channel> {
        let mut conn = self.pool.acquire().await?;
        let row = Self::row_by_ref(&mut conn, channel_ref).await?;
        self.assemble(&mut conn, row).await
    }

    async fn add_channel(&self, new: &NewChannel) -> Result<i64> {
        if new.name.trim().is_empty() {
            return Err(Error::validation("channel name must not be empty"));
        }

        let now = Utc::now().to_rfc3339();
        let settings = serde_json::to_string(&new.settings)?;
        let metarr = serde_json::to_string(&new.metarr)?;

        let mut tx = self.pool.begin().await?;

        let channel_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO channels (name, settings, metarr, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&new.name)
        .bind(&settings)
        .bind(&metarr)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e, "channels.name") {
                Error::already_exists(format!("channel '{}' already exists", new.name))
            } else {
                e.into()
            }
        })?;

        for url in &new.urls {
            let url_settings = url
                .settings
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let url_metarr = url.metarr.as_ref().map(serde_json::to_string).transpose()?;
            let (username, encrypted_password, login_url) = match &url.auth {
                Some(auth) => (
                    Some(auth.username.clone()),
                    Some(self.cipher.encrypt(&auth.password)?),
                    Some(auth.login_url.clone()),
                ),
                None => (None, None, None),
            };

            sqlx::query(
                "INSERT INTO channel_urls \
                 (channel_id, url, username, encrypted_password, login_url, is_manual, \
                  settings, metarr, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(channel_id)
            .bind(&url.url)
            .bind(username)
            .bind(encrypted_password)
            .bind(login_url)
            .bind(url.is_manual)
            .bind(url_settings)
            .bind(url_metarr)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(channel_id)
    }

    async fn update_settings_json(
        &self,
        channel_ref: &ChannelRef,
        mutator: &(dyn for<'a> Fn(&'a mut ChannelSettings) + Send + Sync),
    ) -> Result<()> {
        retry_on_busy("update_settings_json", || async {
            let mut tx = self.pool.begin().await?;
            let row = Self::row_by_ref(&mut tx, channel_ref).await?;

            let mut settings: ChannelSettings = serde_json::from_str(&row.settings)?;
            mutator(&mut settings);
            let blob = serde_json::to_string(&settings)?;

            sqlx::query("UPDATE channels SET settings = ?, updated_at = ? WHERE id = ?")
                .bind(&blob)
                .bind(Utc::now().to_rfc3339())
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn update_metarr_json(
        &self,
        channel_ref: &ChannelRef,
        mutator: &(dyn for<'a> Fn(&'a mut MetarrArgs) + Send + Sync),
    ) -> Result<()> {
        retry_on_busy("update_metarr_json", || async {
            let mut tx = self.pool.begin().await?;
            let row = Self::row_by_ref(&mut tx, channel_ref).await?;

            let mut metarr: MetarrArgs = serde_json::from_str(&row.metarr)?;
            mutator(&mut metarr);
            let blob = serde_json::to_string(&metarr)?;

            sqlx::query("UPDATE channels SET metarr = ?, updated_at = ? WHERE id = ?")
                .bind(&blob)
                .bind(Utc::now().to_rfc3339())
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn update_channel_last_scan(&self, channel_id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE channels SET last_scan = ?, updated_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", channel_id.to_string()));
        }
        Ok(())
    }

    async fn update_url_last_scan(&self, channel_url_id: i64, at: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE channel_urls SET last_scan = ?, updated_at = ? WHERE id = ?")
                .bind(at.to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .bind(channel_url_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("ChannelUrl", channel_url_id.to_string()));
        }
        Ok(())
    }

    async fn add_auth(&self, channel_id: i64, auth: &[(String, ChannelAuth)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (url, credentials) in auth {
            let encrypted = self.cipher.encrypt(&credentials.password)?;
            let result = sqlx::query(
                "UPDATE channel_urls \
                 SET username = ?, encrypted_password = ?, login_url = ?, updated_at = ? \
                 WHERE channel_id = ? AND url = ?",
            )
            .bind(&credentials.username)
            .bind(&encrypted)
            .bind(&credentials.login_url)
            .bind(Utc::now().to_rfc3339())
            .bind(channel_id)
            .bind(url)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::not_found("ChannelUrl", url.clone()));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn add_notify_urls(&self, channel_id: i64, targets: &[NotifyTarget]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for target in targets {
            sqlx::query(
                "INSERT INTO notify_urls (channel_id, url, name) VALUES (?, ?, ?) \
                 ON CONFLICT (channel_id, url) DO UPDATE SET name = excluded.name",
            )
            .bind(channel_id)
            .bind(&target.url)
            .bind(&target.name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_notify_urls(
        &self,
        channel_id: i64,
        urls: &[String],
        names: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for url in urls {
            sqlx::query("DELETE FROM notify_urls WHERE channel_id = ? AND url = ?")
                .bind(channel_id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }
        for name in names {
            sqlx::query("DELETE FROM notify_urls WHERE channel_id = ? AND name = ?")
                .bind(channel_id)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_notify_urls(&self, channel_id: i64) -> Result<Vec<NotifyTarget>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT url, name FROM notify_urls WHERE channel_id = ? ORDER BY url")
                .bind(channel_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(url, name)| NotifyTarget { url, name })
            .collect())
    }
}
