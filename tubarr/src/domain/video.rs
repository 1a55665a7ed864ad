//! Video entity and its download state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-video pipeline state.
///
/// Stages are strictly sequential for a single video; `SkippedByFilter` and
/// `Failed` are terminal at any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    Discovered,
    MetaFetching,
    MetaFetched,
    Filtered,
    VideoFetching,
    VideoFetched,
    PostProcessing,
    Completed,
    SkippedByFilter,
    Failed,
}

impl VideoState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::SkippedByFilter | Self::Failed
        )
    }

    /// States that occupy a worker slot against the channel's concurrency cap.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::MetaFetching | Self::VideoFetching | Self::PostProcessing
        )
    }
}

impl std::fmt::Display for VideoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::MetaFetching => "meta_fetching",
            Self::MetaFetched => "meta_fetched",
            Self::Filtered => "filtered",
            Self::VideoFetching => "video_fetching",
            Self::VideoFetched => "video_fetched",
            Self::PostProcessing => "post_processing",
            Self::Completed => "completed",
            Self::SkippedByFilter => "skipped_by_filter",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Download progress snapshot stored alongside the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatus {
    pub state: VideoState,
    /// Percentage in `0.0..=100.0`, parsed from the downloader's progress lines.
    pub pct: f32,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self {
            state: VideoState::Discovered,
            pct: 0.0,
        }
    }
}

/// A single downloadable artefact belonging to a channel URL.
///
/// Identity is `(channel_url_id, url)`; the store upserts on that pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Option<i64>,
    pub channel_id: i64,
    pub channel_url_id: i64,
    pub url: String,
    pub title: Option<String>,
    /// Upload date as `YYYYMMDD`, taken from fetched metadata.
    pub upload_date: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: DownloadStatus,
    pub video_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub finished: bool,
    pub was_skipped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// A freshly discovered video, not yet persisted.
    pub fn discovered(channel_id: i64, channel_url_id: i64, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            channel_id,
            channel_url_id,
            url: url.into(),
            title: None,
            upload_date: None,
            metadata: None,
            status: DownloadStatus::default(),
            video_path: None,
            json_path: None,
            finished: false,
            was_skipped: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_active_states() {
        assert!(VideoState::Completed.is_terminal());
        assert!(VideoState::SkippedByFilter.is_terminal());
        assert!(VideoState::Failed.is_terminal());
        assert!(!VideoState::VideoFetching.is_terminal());

        assert!(VideoState::MetaFetching.is_active());
        assert!(VideoState::VideoFetching.is_active());
        assert!(VideoState::PostProcessing.is_active());
        assert!(!VideoState::Discovered.is_active());
        assert!(!VideoState::Completed.is_active());
    }

    #[test]
    fn discovered_video_defaults() {
        let v = Video::discovered(1, 2, "https://example.test/v/1");
        assert_eq!(v.status.state, VideoState::Discovered);
        assert!(!v.finished);
        assert!(!v.was_skipped);
        assert!(v.id.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let status = DownloadStatus {
            state: VideoState::VideoFetching,
            pct: 42.0,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("video_fetching"));
    }
}
