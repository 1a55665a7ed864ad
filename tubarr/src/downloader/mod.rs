//! External downloader contract and its yt-dlp-compatible implementation.

pub mod progress;
pub mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::ChannelSettings;

pub use progress::ProgressReporter;
pub use ytdlp::{YtDlpConfig, YtDlpDownloader};

/// Inputs for one downloader invocation.
///
/// `settings` is the already-merged effective record for the channel URL;
/// the downloader only reads passthrough options out of it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub hostname: String,
    pub cookie_file: Option<PathBuf>,
    pub settings: ChannelSettings,
    /// Destination directory for `fetch_video`.
    pub output_dir: Option<PathBuf>,
    /// Collision-free file stem chosen by the pipeline.
    pub output_stem: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hostname: hostname.into(),
            cookie_file: None,
            settings: ChannelSettings::default(),
            output_dir: None,
            output_stem: None,
        }
    }
}

/// The external URL/metadata/video fetcher.
///
/// Implementations signal bot blocks by returning `Error::BotBlock` after
/// matching stderr against the configured signature table; transient
/// failures come back as `Error::Transient` so the pipeline can retry.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Flat-playlist listing: candidate video URLs in source order.
    async fn list_urls(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<Vec<String>>;

    /// Fetch the metadata record for a single video.
    async fn fetch_metadata(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<serde_json::Value>;

    /// Fetch the video itself; returns the path of the downloaded file.
    async fn fetch_video(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf>;
}
