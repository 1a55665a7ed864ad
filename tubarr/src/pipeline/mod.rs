//! Per-channel download pipeline.
//!
//! Each video travels the state machine exactly once per run: metadata
//! fetch, filter gate, video fetch, post-process, finalise. Stage order is
//! strict per video; videos run concurrently up to the channel's
//! concurrency cap. Transient failures re-enter the failed stage with
//! exponential backoff; a bot-block anywhere cancels the whole run.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    ChannelSettings, DownloadStatus, MetarrArgs, NotifyTarget, Video, VideoState,
};
use crate::downloader::{Downloader, FetchRequest, ProgressReporter};
use crate::filter::{self, FilterOutcome};
use crate::notification::{NotificationDispatcher, NotifyEvent};
use crate::postprocess::PostProcessor;
use crate::utils::filename::{numbered_variant, sanitize_title};
use crate::utils::url::extract_host;
use crate::{Error, Result};
use crate::database::repositories::VideoRepository;

/// Base delay of the retry backoff schedule.
const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Ceiling of the retry backoff schedule.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// `min(2^attempt * 5s, 60s)`.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    BACKOFF_BASE.saturating_mul(factor as u32).min(BACKOFF_CAP)
}

/// Channel-level context shared by every video of a run.
#[derive(Debug, Clone)]
pub struct ChannelRunContext {
    pub channel_id: i64,
    pub channel_name: String,
    pub notify: Vec<NotifyTarget>,
}

/// Terminal fate of one video within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    Completed,
    SkippedByFilter,
    Failed(String),
    BotBlocked(String),
    Cancelled,
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Hostname of the first bot block observed, if any.
    pub bot_blocked: Option<String>,
}

impl PipelineOutcome {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed + self.cancelled
    }
}

/// Bounded-concurrency pipeline over the videos of one channel URL.
pub struct DownloadPipeline<V: VideoRepository + 'static> {
    video_repo: Arc<V>,
    downloader: Arc<dyn Downloader>,
    postprocessor: Arc<dyn PostProcessor>,
    notifier: Arc<NotificationDispatcher>,
    /// Live per-video progress, keyed by video URL.
    statuses: Arc<DashMap<String, DownloadStatus>>,
}

impl<V: VideoRepository + 'static> DownloadPipeline<V> {
    pub fn new(
        video_repo: Arc<V>,
        downloader: Arc<dyn Downloader>,
        postprocessor: Arc<dyn PostProcessor>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            video_repo,
            downloader,
            postprocessor,
            notifier,
            statuses: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot of in-flight download statuses.
    pub fn active_statuses(&self) -> Vec<(String, DownloadStatus)> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Run every video to a terminal state and aggregate the outcome.
    ///
    /// Videos are spawned in source order; `worker_count` permits bound how
    /// many occupy active stages at once. The first bot block cancels the
    /// remaining videos of this run.
    pub async fn run(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        ctx: &ChannelRunContext,
        effective: &ChannelSettings,
        metarr: &MetarrArgs,
        cookie_file: Option<PathBuf>,
        ignore_list: &HashSet<String>,
        videos: Vec<Video>,
    ) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        if videos.is_empty() {
            return outcome;
        }

        let worker_count = effective.effective_concurrency();
        let semaphore = Arc::new(Semaphore::new(worker_count));
        let run_cancel = cancel.child_token();
        let stem_claims: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        info!(
            channel = %ctx.channel_name,
            videos = videos.len(),
            workers = worker_count,
            "Starting download pipeline"
        );

        let mut join_set = JoinSet::new();
        for video in videos {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let run_cancel = run_cancel.clone();
            let ctx = ctx.clone();
            let effective = effective.clone();
            let metarr = metarr.clone();
            let cookie_file = cookie_file.clone();
            let ignore_list = ignore_list.clone();
            let stem_claims = stem_claims.clone();

            join_set.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return VideoOutcome::Cancelled,
                    },
                    _ = run_cancel.cancelled() => return VideoOutcome::Cancelled,
                };

                let video_outcome = this
                    .process_video(
                        &run_cancel,
                        &ctx,
                        &effective,
                        &metarr,
                        cookie_file,
                        &ignore_list,
                        &stem_claims,
                        video,
                    )
                    .await;

                if let VideoOutcome::BotBlocked(_) = &video_outcome {
                    // Stop the remaining videos of this channel run.
                    run_cancel.cancel();
                }
                video_outcome
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(VideoOutcome::Completed) => outcome.completed += 1,
                Ok(VideoOutcome::SkippedByFilter) => outcome.skipped += 1,
                Ok(VideoOutcome::Failed(reason)) => {
                    outcome.failed += 1;
                    debug!(channel = %ctx.channel_name, reason, "Video failed");
                }
                Ok(VideoOutcome::BotBlocked(hostname)) => {
                    outcome.failed += 1;
                    outcome.bot_blocked.get_or_insert(hostname);
                }
                Ok(VideoOutcome::Cancelled) => outcome.cancelled += 1,
                Err(e) => {
                    error!(channel = %ctx.channel_name, error = %e, "Pipeline task panicked");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            channel = %ctx.channel_name,
            completed = outcome.completed,
            skipped = outcome.skipped,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "Download pipeline finished"
        );
        outcome
    }

    /// Drive one video through the state machine.
    #[allow(clippy::too_many_arguments)]
    async fn process_video(
        &self,
        cancel: &CancellationToken,
        ctx: &ChannelRunContext,
        effective: &ChannelSettings,
        metarr: &MetarrArgs,
        cookie_file: Option<PathBuf>,
        ignore_list: &HashSet<String>,
        stem_claims: &Mutex<HashMap<String, u32>>,
        mut video: Video,
    ) -> VideoOutcome {
        let retries = effective.effective_retries();
        let hostname = extract_host(&video.url).unwrap_or_default();

        let mut request = FetchRequest {
            url: video.url.clone(),
            hostname: hostname.clone(),
            cookie_file,
            settings: effective.clone(),
            output_dir: None,
            output_stem: None,
        };

        // Discovered -> MetaFetching
        self.set_status(&mut video, VideoState::MetaFetching, 0.0);
        let metadata = match with_retries(cancel, retries, "metadata fetch", || {
            self.downloader.fetch_metadata(cancel, &request)
        })
        .await
        {
            Ok(metadata) => metadata,
            Err(e) => return self.fail_video(video, e).await,
        };

        // MetaFetching -> MetaFetched
        video.title = metadata
            .get("title")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        video.upload_date = metadata
            .get("upload_date")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        video.metadata = Some(metadata.clone());
        self.set_status(&mut video, VideoState::MetaFetched, 0.0);

        let stem = self.claim_stem(stem_claims, video.title.as_deref().unwrap_or(&video.url));
        if let Err(e) = self.write_metadata_sidecar(effective, &stem, &metadata, &mut video).await {
            warn!(video = %video.url, error = %e, "Failed to write metadata sidecar");
        }

        // MetaFetched -> Filtered | SkippedByFilter
        let decision = filter::evaluate(
            &metadata,
            effective.filter_rules(),
            effective.from_date.as_deref(),
            effective.to_date.as_deref(),
            ignore_list,
            &video.url,
        );
        if !decision.is_accepted() {
            debug!(video = %video.url, ?decision, "Video rejected by filter");
            return self.skip_video(video, decision).await;
        }
        self.set_status(&mut video, VideoState::Filtered, 0.0);

        // Filtered -> VideoFetching
        request.output_dir = Some(effective.output_video_dir());
        request.output_stem = Some(stem);
        self.set_status(&mut video, VideoState::VideoFetching, 0.0);

        let statuses = self.statuses.clone();
        let progress_url = video.url.clone();
        let progress = ProgressReporter::new(move |pct| {
            if let Some(mut status) = statuses.get_mut(&progress_url) {
                status.pct = pct;
            }
        });

        let video_path = match with_retries(cancel, retries, "video fetch", || {
            self.downloader.fetch_video(cancel, &request, &progress)
        })
        .await
        {
            Ok(path) => path,
            Err(e) => return self.fail_video(video, e).await,
        };
        video.video_path = Some(video_path);
        self.set_status(&mut video, VideoState::VideoFetched, 100.0);

        // VideoFetched -> PostProcessing
        self.set_status(&mut video, VideoState::PostProcessing, 100.0);
        let final_path = match with_retries(cancel, retries, "post-processing", || {
            self.postprocessor
                .run(cancel, &video, metarr, effective.move_op_rules())
        })
        .await
        {
            Ok(path) => path,
            Err(e) => return self.fail_video(video, e).await,
        };
        video.video_path = Some(final_path);

        // PostProcessing -> Completed
        video.finished = true;
        self.set_status(&mut video, VideoState::Completed, 100.0);
        if let Err(e) = self.video_repo.save_video(&video).await {
            error!(video = %video.url, error = %e, "Failed to persist completed video");
            self.statuses.remove(&video.url);
            return VideoOutcome::Failed(e.to_string());
        }

        let event = NotifyEvent::video_completed(
            &ctx.channel_name,
            video.title.as_deref().unwrap_or(&video.url),
            &video.url,
            video
                .video_path
                .as_ref()
                .map(|p| p.display().to_string()),
        );
        self.notifier.dispatch(&ctx.notify, &event);

        self.statuses.remove(&video.url);
        VideoOutcome::Completed
    }

    fn set_status(&self, video: &mut Video, state: VideoState, pct: f32) {
        video.status = DownloadStatus { state, pct };
        self.statuses
            .insert(video.url.clone(), video.status.clone());
    }

    /// Claim a collision-free file stem for this run.
    fn claim_stem(&self, claims: &Mutex<HashMap<String, u32>>, title: &str) -> String {
        let stem = sanitize_title(title);
        let mut claims = claims.lock();
        let n = claims.entry(stem.clone()).or_insert(0);
        *n += 1;
        numbered_variant(&stem, *n)
    }

    async fn write_metadata_sidecar(
        &self,
        effective: &ChannelSettings,
        stem: &str,
        metadata: &serde_json::Value,
        video: &mut Video,
    ) -> Result<()> {
        let dir = effective.output_json_dir();
        let path = dir.join(format!("{stem}.info.json"));
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(metadata)?).await?;
        video.json_path = Some(path);
        Ok(())
    }

    /// Terminal filter rejection: persisted as finished + skipped.
    async fn skip_video(&self, mut video: Video, _decision: FilterOutcome) -> VideoOutcome {
        video.finished = true;
        video.was_skipped = true;
        self.set_status(&mut video, VideoState::SkippedByFilter, 0.0);
        if let Err(e) = self.video_repo.save_video(&video).await {
            error!(video = %video.url, error = %e, "Failed to persist skipped video");
        }
        self.statuses.remove(&video.url);
        VideoOutcome::SkippedByFilter
    }

    /// Terminal failure: cancelled videos are not persisted at all so the
    /// next crawl re-discovers them; other failures are recorded unfinished.
    async fn fail_video(&self, mut video: Video, err: Error) -> VideoOutcome {
        self.statuses.remove(&video.url);

        match err {
            Error::Cancelled => {
                video.status = DownloadStatus {
                    state: VideoState::Failed,
                    pct: video.status.pct,
                };
                VideoOutcome::Cancelled
            }
            Error::BotBlock { hostname } => VideoOutcome::BotBlocked(hostname),
            other => {
                video.status = DownloadStatus {
                    state: VideoState::Failed,
                    pct: video.status.pct,
                };
                video.finished = false;
                if let Err(e) = self.video_repo.save_video(&video).await {
                    error!(video = %video.url, error = %e, "Failed to persist failed video");
                }
                VideoOutcome::Failed(other.to_string())
            }
        }
    }
}

/// Re-run `operation` on transient failures, up to `retries` times, backing
/// off `min(2^n * 5s, 60s)` between attempts. Every wait observes
/// cancellation.
pub(crate) async fn with_retries<T, F, Fut>(
    cancel: &CancellationToken,
    retries: u32,
    stage: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retries => {
                let delay = backoff_delay(attempt);
                warn!(stage, attempt = attempt + 1, ?delay, error = %err, "Transient failure, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedule_doubles_to_the_cap() {
        assert_eq!(backoff_delay(0), Duration::from_secs(5));
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(2), Duration::from_secs(20));
        assert_eq!(backoff_delay(3), Duration::from_secs(40));
        assert_eq!(backoff_delay(4), Duration::from_secs(60));
        assert_eq!(backoff_delay(10), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_respect_the_retry_budget() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retries(&cancel, 2, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::transient("blip")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_failures_do_not_retry() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retries(&cancel, 5, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::bot_block("example.test")) }
        })
        .await;

        assert!(result.unwrap_err().is_bot_block());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = with_retries(&cancel, 3, "test", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transient("blip"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> =
            with_retries(&cancel, 3, "test", || async { Ok(()) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
