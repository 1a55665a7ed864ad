//! Service container for dependency injection.
//!
//! Builds the repository layer, the cookie broker, the bot-block
//! controller, the crawl engine, the scheduler, and the orchestrator facade
//! from one database pool and one [`AppConfig`], and owns the process-wide
//! cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::botblock::{BotBlockController, BotBlockSignatures};
use crate::command::CommandRunner;
use crate::config::AppConfig;
use crate::cookies::{AuthClient, CookieBroker, CookieSource, HttpAuthClient, NullCookieSource};
use crate::crawl::{CrawlEngine, CrawlStateRegistry};
use crate::database::crypto::PasswordCipher;
use crate::database::repositories::{
    SqlxChannelRepository, SqlxIgnoreRepository, SqlxVideoRepository,
};
use crate::downloader::{Downloader, YtDlpConfig, YtDlpDownloader};
use crate::notification::NotificationDispatcher;
use crate::pipeline::DownloadPipeline;
use crate::postprocess::{MetarrPostProcessor, PostProcessor};
use crate::scheduler::{Scheduler, SchedulerConfig};

use super::orchestrator::Orchestrator;

type SqlxOrchestrator =
    Orchestrator<SqlxChannelRepository, SqlxVideoRepository, SqlxIgnoreRepository>;

/// Holds every service of the running process.
pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub channel_repo: Arc<SqlxChannelRepository>,
    pub video_repo: Arc<SqlxVideoRepository>,
    pub ignore_repo: Arc<SqlxIgnoreRepository>,
    pub orchestrator: Arc<SqlxOrchestrator>,
    config: AppConfig,
    cancellation_token: CancellationToken,
    /// Whether any channel failed in any cycle; drives the exit code.
    had_failures: AtomicBool,
}

impl ServiceContainer {
    /// Wire up all services with the production external tools.
    pub async fn new(pool: SqlitePool, config: AppConfig) -> Result<Self> {
        let runner = CommandRunner::new(config.termination_grace);
        let signatures = Arc::new(BotBlockSignatures::default());

        let downloader: Arc<dyn Downloader> = Arc::new(YtDlpDownloader::new(
            runner.clone(),
            YtDlpConfig {
                program: config.downloader_path.clone(),
                listing_timeout: config.command_timeout,
                ..YtDlpConfig::default()
            },
            signatures.clone(),
        ));
        let postprocessor: Arc<dyn PostProcessor> = Arc::new(MetarrPostProcessor::new(
            runner,
            config.postprocessor_path.clone(),
        ));
        let browser_source: Arc<dyn CookieSource> = Arc::new(NullCookieSource);
        let auth_client: Arc<dyn AuthClient> = Arc::new(HttpAuthClient::new()?);

        Self::with_tools(
            pool,
            config,
            downloader,
            postprocessor,
            auth_client,
            browser_source,
        )
    }

    /// Wire up all services with injected tool implementations.
    ///
    /// Integration tests use this to substitute fakes for the external
    /// downloader, post-processor, login client, and browser cookie store.
    pub fn with_tools(
        pool: SqlitePool,
        config: AppConfig,
        downloader: Arc<dyn Downloader>,
        postprocessor: Arc<dyn PostProcessor>,
        auth_client: Arc<dyn AuthClient>,
        browser_source: Arc<dyn CookieSource>,
    ) -> Result<Self> {
        info!("Initializing service container");

        let cipher = PasswordCipher::from_secret(&config.secret_key);
        let channel_repo = Arc::new(SqlxChannelRepository::new(pool.clone(), cipher));
        let video_repo = Arc::new(SqlxVideoRepository::new(pool.clone()));
        let ignore_repo = Arc::new(SqlxIgnoreRepository::new(pool.clone()));

        let cookie_broker = Arc::new(CookieBroker::new(
            auth_client,
            browser_source,
            config.cookie_dir.clone(),
        ));

        let botblock = Arc::new(BotBlockController::new(
            channel_repo.clone(),
            config.bot_block_cooldown,
        ));

        let notifier = Arc::new(NotificationDispatcher::new());
        let pipeline = Arc::new(DownloadPipeline::new(
            video_repo.clone(),
            downloader.clone(),
            postprocessor,
            notifier,
        ));

        let registry = CrawlStateRegistry::new();
        let engine = Arc::new(CrawlEngine::new(
            channel_repo.clone(),
            video_repo.clone(),
            ignore_repo.clone(),
            cookie_broker,
            botblock.clone(),
            downloader,
            pipeline,
            registry,
        ));

        let scheduler = Arc::new(Scheduler::new(
            channel_repo.clone(),
            engine.clone(),
            botblock.clone(),
            SchedulerConfig {
                max_concurrent_crawls: config.max_concurrent_crawls,
            },
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            channel_repo.clone(),
            engine,
            scheduler,
            botblock,
        ));

        Ok(Self {
            pool,
            channel_repo,
            video_repo,
            ignore_repo,
            orchestrator,
            config,
            cancellation_token: CancellationToken::new(),
            had_failures: AtomicBool::new(false),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// True when any channel failed in any completed cycle.
    pub fn had_failures(&self) -> bool {
        self.had_failures.load(Ordering::SeqCst)
    }

    /// Run scheduled cycles until shutdown.
    pub async fn run_scheduler_loop(&self) {
        let cancel = self.cancellation_token.clone();
        info!(
            interval = ?self.config.cycle_interval,
            "Starting scheduler loop"
        );

        loop {
            match self.orchestrator.run_cycle(&cancel).await {
                Ok(summary) => {
                    summary.emit_markers();
                    if !summary.is_clean() {
                        self.had_failures.store(true, Ordering::SeqCst);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Scheduling cycle failed");
                    self.had_failures.store(true, Ordering::SeqCst);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
                _ = cancel.cancelled() => {
                    info!("Scheduler loop shutting down");
                    return;
                }
            }
        }
    }

    /// Signal shutdown and let in-flight work observe it.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.pool.close().await;
    }
}
