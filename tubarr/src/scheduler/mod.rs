//! Scheduled crawling and run summaries.

pub mod service;

pub use service::{Scheduler, SchedulerConfig};

use tracing::{error, info, warn};

use crate::crawl::ChannelCrawlReport;

/// Why the scheduler left a channel alone this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    BotBlocked,
    /// `crawl_freq == 0`: never auto-crawled.
    Disabled,
    /// The crawl-frequency gap has not elapsed yet.
    NotDue,
    /// Another run already holds the channel.
    AlreadyActive,
}

/// Terminal outcome for one channel in a run.
#[derive(Debug, Clone)]
pub enum ChannelOutcome {
    Completed(ChannelCrawlReport),
    Skipped(SkipReason),
    Failed(String),
}

/// One channel's row in a [`RunSummary`].
#[derive(Debug, Clone)]
pub struct ChannelRunReport {
    pub channel_id: i64,
    pub channel_name: String,
    pub outcome: ChannelOutcome,
}

/// Structured summary returned by every orchestrator operation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub channels: Vec<ChannelRunReport>,
}

impl RunSummary {
    pub fn single(report: ChannelRunReport) -> Self {
        Self {
            channels: vec![report],
        }
    }

    /// Channels that actually crawled.
    pub fn processed(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Completed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Failed(_)))
            .count()
    }

    /// True when no channel failed; drives the process exit code.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    /// Emit the user-facing per-channel marker lines.
    pub fn emit_markers(&self) {
        for channel in &self.channels {
            match &channel.outcome {
                ChannelOutcome::Completed(report) if report.bot_blocked_hosts.is_empty() => {
                    info!(
                        "[S] channel '{}': {} downloaded, {} skipped, {} failed",
                        channel.channel_name,
                        report.videos_completed,
                        report.videos_skipped,
                        report.videos_failed
                    );
                }
                ChannelOutcome::Completed(report) => {
                    warn!(
                        "[W] channel '{}': bot-blocked on {:?}; run `unblock` to resume",
                        channel.channel_name, report.bot_blocked_hosts
                    );
                }
                ChannelOutcome::Skipped(reason) => {
                    info!(
                        "channel '{}' skipped ({:?})",
                        channel.channel_name, reason
                    );
                }
                ChannelOutcome::Failed(reason) => {
                    error!("[E] channel '{}': {}", channel.channel_name, reason);
                }
            }
        }
    }
}
