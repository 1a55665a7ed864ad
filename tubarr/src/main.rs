//! tubarr - Channel Crawl & Download Orchestrator
//!
//! A long-running process that watches user-defined channels, discovers new
//! videos, and drives the external downloader and post-processor to fetch
//! and transform them.

use std::process::ExitCode;
use std::sync::Arc;

use tubarr::config::AppConfig;
use tubarr::database;
use tubarr::logging::init_logging;
use tubarr::services::ServiceContainer;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    let (_logging_config, _guard) = init_logging(&config.log_dir.display().to_string())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
    tubarr::panic_hook::install(&config.log_dir);

    info!("Starting tubarr v{}", env!("CARGO_PKG_VERSION"));

    info!("Connecting to database: {}", config.database_url);
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = Arc::new(ServiceContainer::new(pool, config).await?);
    _logging_config.start_retention_cleanup(container.cancellation_token());

    // Scheduled cycles run until a shutdown signal arrives.
    let loop_container = container.clone();
    let scheduler_task = tokio::spawn(async move {
        loop_container.run_scheduler_loop().await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    info!("Shutting down...");
    container.shutdown().await;
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {e}");
    }

    info!("tubarr shutdown complete");
    if container.had_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Wait for SIGTERM (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// On non-Unix targets SIGTERM does not exist; Ctrl+C handles shutdown.
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
