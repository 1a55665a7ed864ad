//! Orchestrator facade: the three operations the CLI layer consumes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::botblock::BotBlockController;
use crate::crawl::{CrawlEngine, CrawlMode};
use crate::database::repositories::{ChannelRepository, IgnoreRepository, VideoRepository};
use crate::domain::ChannelRef;
use crate::scheduler::{ChannelOutcome, ChannelRunReport, RunSummary, Scheduler};

/// Entry point for scheduled cycles and explicit channel commands.
///
/// Every operation returns a [`RunSummary`] with per-channel outcomes.
pub struct Orchestrator<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    channel_repo: Arc<C>,
    engine: Arc<CrawlEngine<C, V, I>>,
    scheduler: Arc<Scheduler<C, V, I>>,
    botblock: Arc<BotBlockController<C>>,
}

impl<C, V, I> Orchestrator<C, V, I>
where
    C: ChannelRepository + 'static,
    V: VideoRepository + 'static,
    I: IgnoreRepository + 'static,
{
    pub fn new(
        channel_repo: Arc<C>,
        engine: Arc<CrawlEngine<C, V, I>>,
        scheduler: Arc<Scheduler<C, V, I>>,
        botblock: Arc<BotBlockController<C>>,
    ) -> Self {
        Self {
            channel_repo,
            engine,
            scheduler,
            botblock,
        }
    }

    /// Scheduled run over every eligible channel.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        self.scheduler.run_cycle(cancel).await
    }

    /// Explicit crawl of one channel; bypasses pause and bot-block gates.
    pub async fn crawl_one(
        &self,
        cancel: &CancellationToken,
        channel_ref: &ChannelRef,
        mode: CrawlMode,
    ) -> Result<RunSummary> {
        let channel = self.channel_repo.get_by_ref(channel_ref).await?;
        let outcome = match self
            .engine
            .crawl_channel(cancel, &channel, mode, true)
            .await
        {
            Ok(report) => ChannelOutcome::Completed(report),
            Err(e) => return Err(e),
        };

        Ok(RunSummary::single(ChannelRunReport {
            channel_id: channel.id,
            channel_name: channel.name,
            outcome,
        }))
    }

    /// Treat caller-supplied video URLs as pre-discovered and download them.
    pub async fn download_urls(
        &self,
        cancel: &CancellationToken,
        channel_ref: &ChannelRef,
        urls: Vec<String>,
    ) -> Result<RunSummary> {
        self.crawl_one(cancel, channel_ref, CrawlMode::Manual(urls))
            .await
    }

    /// Clear a channel's bot-block state.
    pub async fn unblock(&self, channel_ref: &ChannelRef) -> Result<()> {
        self.botblock.unblock(channel_ref).await
    }
}
