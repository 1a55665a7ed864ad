//! Single-channel crawl execution.
//!
//! All three crawl modes share one skeleton: resolve cookies, list candidate
//! URLs, drop everything already ignored or stored, then act on the
//! survivors. Channel URLs are visited sequentially because cookie reuse
//! depends on the declared order; the video-level work inside a URL is
//! parallelised by the pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::botblock::BotBlockController;
use crate::cookies::{CookieBroker, ResolveRequest};
use crate::database::repositories::{ChannelRepository, IgnoreRepository, VideoRepository};
use crate::domain::{Channel, ChannelRef, ChannelUrl, Video};
use crate::downloader::{Downloader, FetchRequest};
use crate::pipeline::{ChannelRunContext, DownloadPipeline};
use crate::utils::url::{extract_host, normalize_for_dedup};
use crate::{Error, Result};

use super::registry::CrawlStateRegistry;

/// What to do with discovered URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlMode {
    /// Enqueue survivors into the download pipeline.
    Download,
    /// Record survivors on the ignore list; download nothing.
    Ignore,
    /// Skip discovery; treat the given URLs as the candidate list.
    Manual(Vec<String>),
}

/// Per-channel result of one crawl.
#[derive(Debug, Clone, Default)]
pub struct ChannelCrawlReport {
    pub channel_id: i64,
    pub channel_name: String,
    pub videos_completed: usize,
    pub videos_skipped: usize,
    pub videos_failed: usize,
    pub urls_ignored: usize,
    /// Hostnames marked bot-blocked during this crawl.
    pub bot_blocked_hosts: Vec<String>,
}

impl ChannelCrawlReport {
    pub fn has_failures(&self) -> bool {
        self.videos_failed > 0 || !self.bot_blocked_hosts.is_empty()
    }
}

/// Executes a single channel crawl end to end.
pub struct CrawlEngine<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    channel_repo: Arc<C>,
    video_repo: Arc<V>,
    ignore_repo: Arc<I>,
    cookie_broker: Arc<CookieBroker>,
    botblock: Arc<BotBlockController<C>>,
    downloader: Arc<dyn Downloader>,
    pipeline: Arc<DownloadPipeline<V>>,
    registry: CrawlStateRegistry,
}

impl<C, V, I> CrawlEngine<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_repo: Arc<C>,
        video_repo: Arc<V>,
        ignore_repo: Arc<I>,
        cookie_broker: Arc<CookieBroker>,
        botblock: Arc<BotBlockController<C>>,
        downloader: Arc<dyn Downloader>,
        pipeline: Arc<DownloadPipeline<V>>,
        registry: CrawlStateRegistry,
    ) -> Self {
        Self {
            channel_repo,
            video_repo,
            ignore_repo,
            cookie_broker,
            botblock,
            downloader,
            pipeline,
            registry,
        }
    }

    pub fn registry(&self) -> &CrawlStateRegistry {
        &self.registry
    }

    /// Crawl one channel.
    ///
    /// `explicit` marks a user command, which may crawl paused or
    /// bot-blocked channels the scheduler would skip. Returns
    /// `Error::Conflict` when another run already holds the channel.
    pub async fn crawl_channel(
        &self,
        cancel: &CancellationToken,
        channel: &Channel,
        mode: CrawlMode,
        explicit: bool,
    ) -> Result<ChannelCrawlReport> {
        let Some(_guard) = self.registry.try_acquire(&channel.name) else {
            return Err(Error::Conflict(format!(
                "channel '{}' already has an active run",
                channel.name
            )));
        };

        let now = Utc::now();
        if !explicit {
            if channel.settings.is_paused() {
                return Err(Error::Conflict(format!(
                    "channel '{}' is paused",
                    channel.name
                )));
            }
            if self
                .botblock
                .is_channel_blocked(&channel.settings, now)
            {
                return Err(Error::bot_block(
                    first_blocked_host(channel).unwrap_or_default(),
                ));
            }
        }

        info!(channel = %channel.name, ?mode, "Starting crawl");
        let mut report = ChannelCrawlReport {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            ..Default::default()
        };

        // Dedup sets: everything already ignored or stored, in exact and
        // normalised form.
        let mut seen = HashSet::new();
        for url in self.ignore_repo.list_ignore_urls(channel.id).await? {
            seen.insert(normalize_for_dedup(&url));
            seen.insert(url);
        }
        let ignore_list: HashSet<String> = seen.clone();
        for video in self.video_repo.videos_by_channel(channel.id).await? {
            seen.insert(normalize_for_dedup(&video.url));
            seen.insert(video.url);
        }

        let notify = self.channel_repo.list_notify_urls(channel.id).await?;
        let ctx = ChannelRunContext {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            notify,
        };
        let channel_ref = ChannelRef::Id(channel.id);

        // Hosts blocked during this crawl; same-host URLs are skipped
        // without invoking the lister again.
        let mut blocked_hosts: HashSet<String> = HashSet::new();

        let member_urls: Vec<&ChannelUrl> = match &mode {
            // Manual URLs attach to the channel's first member URL.
            CrawlMode::Manual(_) => channel.urls.first().into_iter().collect(),
            _ => channel.urls.iter().collect(),
        };
        if member_urls.is_empty() {
            return Err(Error::validation(format!(
                "channel '{}' has no URLs to crawl",
                channel.name
            )));
        }

        for member in member_urls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some(hostname) = extract_host(&member.url) else {
                warn!(url = %member.url, "Skipping channel URL with no http(s) host");
                continue;
            };

            let effective = channel.effective_settings(member);
            if blocked_hosts.contains(&hostname)
                || self.botblock.is_blocked(&effective, &hostname, now)
            {
                debug!(url = %member.url, hostname, "Skipping bot-blocked host");
                continue;
            }

            let cookie_file = self
                .cookie_broker
                .resolve(
                    cancel,
                    &ResolveRequest {
                        channel_name: &channel.name,
                        url: &member.url,
                        hostname: &hostname,
                        auth: member.auth.as_ref(),
                        use_global_cookies: effective.uses_global_cookies(),
                    },
                )
                .await?;

            let candidates = match &mode {
                CrawlMode::Manual(urls) => urls.clone(),
                _ => {
                    let request = FetchRequest {
                        cookie_file: cookie_file.clone(),
                        settings: effective.clone(),
                        ..FetchRequest::new(member.url.clone(), hostname.clone())
                    };
                    match self.downloader.list_urls(cancel, &request).await {
                        Ok(urls) => urls,
                        Err(Error::BotBlock { hostname: blocked }) => {
                            self.botblock
                                .mark_blocked(&channel_ref, &blocked, now)
                                .await?;
                            blocked_hosts.insert(blocked.clone());
                            report.bot_blocked_hosts.push(blocked);
                            continue;
                        }
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) => {
                            error!(url = %member.url, error = %e, "Listing failed, skipping URL");
                            continue;
                        }
                    }
                }
            };

            let survivors = dedup_candidates(candidates, &seen);
            debug!(
                url = %member.url,
                survivors = survivors.len(),
                "Candidates after dedup"
            );

            match &mode {
                CrawlMode::Ignore => {
                    self.ignore_repo
                        .add_ignore_urls(channel.id, &survivors)
                        .await?;
                    report.urls_ignored += survivors.len();
                    for url in survivors {
                        seen.insert(normalize_for_dedup(&url));
                        seen.insert(url);
                    }
                }
                CrawlMode::Download | CrawlMode::Manual(_) => {
                    if !survivors.is_empty()
                        && let Err(e) = prepare_output_dirs(&effective)
                    {
                        error!(url = %member.url, error = %e, "Output directories unusable, skipping URL");
                        continue;
                    }

                    let videos: Vec<Video> = survivors
                        .iter()
                        .map(|url| Video::discovered(channel.id, member.id, url.clone()))
                        .collect();
                    for url in &survivors {
                        seen.insert(normalize_for_dedup(url));
                        seen.insert(url.clone());
                    }

                    let metarr = channel.effective_metarr(member);
                    let outcome = self
                        .pipeline
                        .run(
                            cancel,
                            &ctx,
                            &effective,
                            &metarr,
                            cookie_file,
                            &ignore_list,
                            videos,
                        )
                        .await;

                    report.videos_completed += outcome.completed;
                    report.videos_skipped += outcome.skipped;
                    report.videos_failed += outcome.failed + outcome.cancelled;
                    if let Some(blocked) = outcome.bot_blocked {
                        self.botblock
                            .mark_blocked(&channel_ref, &blocked, now)
                            .await?;
                        blocked_hosts.insert(blocked.clone());
                        report.bot_blocked_hosts.push(blocked);
                    }
                }
            }

            if let Err(e) = self.channel_repo.update_url_last_scan(member.id, now).await {
                warn!(url = %member.url, error = %e, "Failed to update URL last-scan");
            }
        }

        if let Err(e) = self
            .channel_repo
            .update_channel_last_scan(channel.id, now)
            .await
        {
            warn!(channel = %channel.name, error = %e, "Failed to update channel last-scan");
        }

        info!(
            channel = %channel.name,
            completed = report.videos_completed,
            skipped = report.videos_skipped,
            failed = report.videos_failed,
            ignored = report.urls_ignored,
            "Crawl finished"
        );
        Ok(report)
    }
}

/// Output directories must exist and be writable before any download runs.
fn prepare_output_dirs(effective: &crate::domain::ChannelSettings) -> Result<()> {
    crate::utils::fs::ensure_writable_dir("preparing video directory", &effective.output_video_dir())?;
    crate::utils::fs::ensure_writable_dir("preparing json directory", &effective.output_json_dir())?;
    Ok(())
}

/// Drop candidates already present in `seen` (exact or normalised), and
/// dedupe within the batch while preserving source order.
fn dedup_candidates(candidates: Vec<String>, seen: &HashSet<String>) -> Vec<String> {
    let mut batch_seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|url| {
            let normalized = normalize_for_dedup(url);
            if seen.contains(url) || seen.contains(&normalized) {
                return false;
            }
            batch_seen.insert(normalized)
        })
        .collect()
}

fn first_blocked_host(channel: &Channel) -> Option<String> {
    channel
        .settings
        .bot_blocked_hostnames
        .as_ref()
        .and_then(|hosts| hosts.iter().next().cloned())
}
