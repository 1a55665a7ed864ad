//! Row structs mapping database tables, plus converters to domain types.
//!
//! Rows keep database-compatible types (TEXT timestamps, JSON blobs as
//! strings); the converters parse them into the domain model. Blob columns
//! round-trip unknown JSON keys verbatim via the domain types' capture maps.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::domain::{
    Channel, ChannelAuth, ChannelSettings, ChannelUrl, DownloadStatus, MetarrArgs, Video,
};
use crate::{Error, Result};

/// Represents the `channels` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub settings: String,
    pub metarr: String,
    pub last_scan: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Represents the `channel_urls` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChannelUrlRow {
    pub id: i64,
    pub channel_id: i64,
    pub url: String,
    pub username: Option<String>,
    pub encrypted_password: Option<String>,
    pub login_url: Option<String>,
    pub is_manual: bool,
    pub settings: Option<String>,
    pub metarr: Option<String>,
    pub last_scan: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Represents the `videos` table.
#[derive(Debug, Clone, FromRow)]
pub struct VideoRow {
    pub id: i64,
    pub channel_id: i64,
    pub channel_url_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub upload_date: Option<String>,
    pub video_path: Option<String>,
    pub json_path: Option<String>,
    pub finished: bool,
    pub was_skipped: bool,
    pub download_status: String,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Parse an RFC 3339 timestamp column, falling back to `None` on garbage.
pub fn parse_optional_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Parse a required RFC 3339 timestamp column.
pub fn parse_required_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::fatal(format!("corrupt timestamp '{raw}': {e}")))
}

impl ChannelRow {
    /// Convert into a domain channel, attaching its member URLs.
    pub fn into_domain(self, urls: Vec<ChannelUrl>) -> Result<Channel> {
        let settings: ChannelSettings = serde_json::from_str(&self.settings)?;
        let metarr: MetarrArgs = serde_json::from_str(&self.metarr)?;
        Ok(Channel {
            id: self.id,
            name: self.name,
            urls,
            settings,
            metarr,
            last_scan: parse_optional_ts(self.last_scan.as_deref()),
            created_at: parse_required_ts(&self.created_at)?,
            updated_at: parse_required_ts(&self.updated_at)?,
        })
    }
}

impl ChannelUrlRow {
    /// Convert into a domain channel URL.
    ///
    /// `password` must already be decrypted by the caller; auth is present
    /// only when the row carries a username.
    pub fn into_domain(self, password: Option<String>) -> Result<ChannelUrl> {
        let auth = match (self.username, password) {
            (Some(username), Some(pw)) if !username.is_empty() => Some(ChannelAuth {
                username,
                password: pw,
                login_url: self.login_url.unwrap_or_default(),
            }),
            _ => None,
        };

        let settings = self
            .settings
            .as_deref()
            .map(serde_json::from_str::<ChannelSettings>)
            .transpose()?;
        let metarr = self
            .metarr
            .as_deref()
            .map(serde_json::from_str::<MetarrArgs>)
            .transpose()?;

        Ok(ChannelUrl {
            id: self.id,
            channel_id: self.channel_id,
            url: self.url,
            auth,
            settings,
            metarr,
            last_scan: parse_optional_ts(self.last_scan.as_deref()),
            is_manual: self.is_manual,
        })
    }
}

impl VideoRow {
    pub fn into_domain(self) -> Result<Video> {
        let status: DownloadStatus =
            serde_json::from_str(&self.download_status).unwrap_or_default();
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(Video {
            id: Some(self.id),
            channel_id: self.channel_id,
            channel_url_id: self.channel_url_id,
            url: self.url,
            title: self.title,
            upload_date: self.upload_date,
            metadata,
            status,
            video_path: self.video_path.map(Into::into),
            json_path: self.json_path.map(Into::into),
            finished: self.finished,
            was_skipped: self.was_skipped,
            created_at: parse_required_ts(&self.created_at)?,
            updated_at: parse_required_ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamps() {
        assert!(parse_optional_ts(Some("2026-01-02T03:04:05Z")).is_some());
        assert!(parse_optional_ts(Some("not a date")).is_none());
        assert!(parse_optional_ts(None).is_none());
        assert!(parse_required_ts("garbage").is_err());
    }

    #[test]
    fn channel_row_round_trips_settings_blob() {
        let row = ChannelRow {
            id: 1,
            name: "demo".to_string(),
            settings: r#"{"crawl_freq":15,"mystery_key":true}"#.to_string(),
            metarr: "{}".to_string(),
            last_scan: None,
            created_at: "2026-01-02T03:04:05Z".to_string(),
            updated_at: "2026-01-02T03:04:05Z".to_string(),
        };
        let channel = row.into_domain(Vec::new()).unwrap();
        assert_eq!(channel.settings.crawl_freq, Some(15));
        assert!(channel.settings.extra.contains_key("mystery_key"));
    }

    #[test]
    fn url_row_without_username_has_no_auth() {
        let row = ChannelUrlRow {
            id: 1,
            channel_id: 1,
            url: "https://example.test/u/a".to_string(),
            username: None,
            encrypted_password: None,
            login_url: None,
            is_manual: false,
            settings: None,
            metarr: None,
            last_scan: None,
            created_at: "2026-01-02T03:04:05Z".to_string(),
            updated_at: "2026-01-02T03:04:05Z".to_string(),
        };
        let url = row.into_domain(None).unwrap();
        assert!(url.auth.is_none());
    }
}
