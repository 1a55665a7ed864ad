//! Scheduler: decides which channels crawl now and dispatches them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::Result;
use crate::botblock::BotBlockController;
use crate::crawl::{CrawlEngine, CrawlMode};
use crate::database::repositories::{ChannelRepository, IgnoreRepository, VideoRepository};
use crate::domain::{Channel, CrawlFrequency};

use super::{ChannelOutcome, ChannelRunReport, RunSummary, SkipReason};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrent channel crawls.
    pub max_concurrent_crawls: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_crawls: 4,
        }
    }
}

/// Dispatches eligible channels to crawl workers and aggregates results.
pub struct Scheduler<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    channel_repo: Arc<C>,
    engine: Arc<CrawlEngine<C, V, I>>,
    botblock: Arc<BotBlockController<C>>,
    config: SchedulerConfig,
}

/// Why a channel is not eligible right now, or `None` when it should crawl.
pub(crate) fn skip_reason(
    channel: &Channel,
    now: DateTime<Utc>,
    bot_block_cooldown: Duration,
) -> Option<SkipReason> {
    if channel.settings.is_paused() {
        return Some(SkipReason::Paused);
    }
    if channel.settings.is_bot_blocked(now, bot_block_cooldown) {
        return Some(SkipReason::BotBlocked);
    }
    match channel.settings.effective_crawl_freq() {
        CrawlFrequency::Disabled => Some(SkipReason::Disabled),
        CrawlFrequency::Every(gap) => {
            let due = match channel.last_scan {
                None => true,
                Some(last_scan) => {
                    let elapsed = now.signed_duration_since(last_scan);
                    elapsed >= chrono::Duration::from_std(gap).unwrap_or(chrono::Duration::MAX)
                }
            };
            (!due).then_some(SkipReason::NotDue)
        }
    }
}

impl<C, V, I> Scheduler<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    pub fn new(
        channel_repo: Arc<C>,
        engine: Arc<CrawlEngine<C, V, I>>,
        botblock: Arc<BotBlockController<C>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            channel_repo,
            engine,
            botblock,
            config,
        }
    }

    /// One scheduling cycle: crawl every eligible channel, return when all
    /// dispatched crawls have terminated (or cancellation was observed).
    pub async fn run_cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<RunSummary> {
        let channels = self.channel_repo.list_channels().await?;
        let now = Utc::now();

        let mut summary = RunSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_crawls.max(1)));
        let mut join_set: JoinSet<ChannelRunReport> = JoinSet::new();

        // `list_channels` is ordered by id; dispatch order follows it.
        for channel in channels {
            if let Some(reason) = skip_reason(&channel, now, self.botblock.cooldown()) {
                debug!(channel = %channel.name, ?reason, "Channel not eligible");
                summary.channels.push(ChannelRunReport {
                    channel_id: channel.id,
                    channel_name: channel.name.clone(),
                    outcome: ChannelOutcome::Skipped(reason),
                });
                continue;
            }

            if cancel.is_cancelled() {
                // Stop dispatching; channels not yet started are skipped.
                break;
            }

            let this = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            return this.failed_report(&channel, "scheduler shut down".to_string());
                        }
                    },
                    _ = cancel.cancelled() => {
                        // Never started: no last-scan bump, no partial state.
                        return ChannelRunReport {
                            channel_id: channel.id,
                            channel_name: channel.name.clone(),
                            outcome: ChannelOutcome::Failed(Error::Cancelled.to_string()),
                        };
                    }
                };

                match this
                    .engine
                    .crawl_channel(&cancel, &channel, CrawlMode::Download, false)
                    .await
                {
                    Ok(report) => ChannelRunReport {
                        channel_id: channel.id,
                        channel_name: channel.name.clone(),
                        outcome: ChannelOutcome::Completed(report),
                    },
                    Err(Error::Conflict(reason)) => {
                        debug!(channel = %channel.name, reason, "Crawl already active");
                        ChannelRunReport {
                            channel_id: channel.id,
                            channel_name: channel.name.clone(),
                            outcome: ChannelOutcome::Skipped(SkipReason::AlreadyActive),
                        }
                    }
                    Err(e) => this.failed_report(&channel, e.to_string()),
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => summary.channels.push(report),
                Err(e) => warn!(error = %e, "Crawl task panicked"),
            }
        }

        info!(
            processed = summary.processed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Scheduling cycle finished"
        );
        Ok(summary)
    }

    /// A failing channel still gets its `last_scan` bumped so it cannot
    /// starve other channels by failing fast on every cycle.
    fn failed_report(&self, channel: &Channel, reason: String) -> ChannelRunReport {
        warn!(channel = %channel.name, reason, "Channel crawl failed");
        let repo = self.channel_repo.clone();
        let channel_id = channel.id;
        tokio::spawn(async move {
            if let Err(e) = repo.update_channel_last_scan(channel_id, Utc::now()).await {
                warn!(channel_id, error = %e, "Failed to update last-scan after crawl failure");
            }
        });
        ChannelRunReport {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            outcome: ChannelOutcome::Failed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelSettings, MetarrArgs};

    fn channel_with(settings: ChannelSettings, last_scan: Option<DateTime<Utc>>) -> Channel {
        let now = Utc::now();
        Channel {
            id: 1,
            name: "demo".to_string(),
            urls: Vec::new(),
            settings,
            metarr: MetarrArgs::default(),
            last_scan,
            created_at: now,
            updated_at: now,
        }
    }

    const COOLDOWN: Duration = Duration::from_secs(12 * 3600);

    #[test]
    fn paused_channels_are_skipped() {
        let channel = channel_with(
            ChannelSettings {
                paused: Some(true),
                ..Default::default()
            },
            None,
        );
        assert_eq!(
            skip_reason(&channel, Utc::now(), COOLDOWN),
            Some(SkipReason::Paused)
        );
    }

    #[test]
    fn zero_crawl_freq_disables_scheduling() {
        let channel = channel_with(
            ChannelSettings {
                crawl_freq: Some(0),
                ..Default::default()
            },
            None,
        );
        assert_eq!(
            skip_reason(&channel, Utc::now(), COOLDOWN),
            Some(SkipReason::Disabled)
        );
    }

    #[test]
    fn never_scanned_channel_is_due() {
        let channel = channel_with(ChannelSettings::default(), None);
        assert_eq!(skip_reason(&channel, Utc::now(), COOLDOWN), None);
    }

    #[test]
    fn recently_scanned_channel_is_not_due() {
        let now = Utc::now();
        let channel = channel_with(
            ChannelSettings {
                crawl_freq: Some(30),
                ..Default::default()
            },
            Some(now - chrono::Duration::minutes(10)),
        );
        assert_eq!(
            skip_reason(&channel, now, COOLDOWN),
            Some(SkipReason::NotDue)
        );

        let stale = channel_with(
            ChannelSettings {
                crawl_freq: Some(30),
                ..Default::default()
            },
            Some(now - chrono::Duration::minutes(31)),
        );
        assert_eq!(skip_reason(&stale, now, COOLDOWN), None);
    }

    #[test]
    fn bot_blocked_channel_is_skipped_until_cooldown_expires() {
        let now = Utc::now();
        let mut settings = ChannelSettings::default();
        settings.record_bot_block("example.test", now - chrono::Duration::hours(1));

        let channel = channel_with(settings.clone(), None);
        assert_eq!(
            skip_reason(&channel, now, COOLDOWN),
            Some(SkipReason::BotBlocked)
        );

        // Cooldown elapsed: the channel becomes eligible again.
        let later = now + chrono::Duration::hours(13);
        assert_eq!(skip_reason(&channel, later, COOLDOWN), None);
    }

    #[test]
    fn negative_crawl_freq_uses_default_gap() {
        let now = Utc::now();
        let channel = channel_with(
            ChannelSettings {
                crawl_freq: Some(-1),
                ..Default::default()
            },
            Some(now - chrono::Duration::minutes(29)),
        );
        assert_eq!(
            skip_reason(&channel, now, COOLDOWN),
            Some(SkipReason::NotDue)
        );
    }
}
