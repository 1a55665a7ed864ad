//! Environment-driven application configuration.
//!
//! The CLI/config-file surface lives outside this crate; the orchestrator
//! itself only needs a handful of operational knobs, all readable from the
//! environment with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::Result;

/// Operational configuration for the orchestrator process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    /// Directory for generated Netscape cookie files.
    pub cookie_dir: PathBuf,
    /// Global cap on concurrent channel crawls.
    pub max_concurrent_crawls: usize,
    /// Gap between scheduled crawl cycles.
    pub cycle_interval: Duration,
    /// How long a bot-block record suppresses a host.
    pub bot_block_cooldown: Duration,
    /// Soft timeout for listing and metadata commands.
    pub command_timeout: Duration,
    /// Grace period between terminate and kill for external processes.
    pub termination_grace: Duration,
    /// Path of the external downloader binary.
    pub downloader_path: PathBuf,
    /// Path of the external post-processor binary.
    pub postprocessor_path: PathBuf,
    /// Secret from which the password-at-rest key is derived.
    pub secret_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:tubarr.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            cookie_dir: PathBuf::from("cookies"),
            max_concurrent_crawls: 4,
            cycle_interval: Duration::from_secs(60),
            bot_block_cooldown: Duration::from_secs(12 * 3600),
            command_timeout: Duration::from_secs(300),
            termination_grace: Duration::from_secs(5),
            downloader_path: PathBuf::from("yt-dlp"),
            postprocessor_path: PathBuf::from("metarr"),
            secret_key: "tubarr-development-secret".to_string(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env_or("DATABASE_URL", defaults.database_url),
            log_dir: env_or("LOG_DIR", defaults.log_dir.display().to_string()).into(),
            cookie_dir: env_or("TUBARR_COOKIE_DIR", defaults.cookie_dir.display().to_string())
                .into(),
            max_concurrent_crawls: env_parsed(
                "TUBARR_MAX_CONCURRENT_CRAWLS",
                defaults.max_concurrent_crawls,
            )?
            .max(1),
            cycle_interval: Duration::from_secs(env_parsed(
                "TUBARR_CYCLE_INTERVAL_SECS",
                defaults.cycle_interval.as_secs(),
            )?),
            bot_block_cooldown: Duration::from_secs(
                env_parsed(
                    "TUBARR_BOT_BLOCK_COOLDOWN_HOURS",
                    defaults.bot_block_cooldown.as_secs() / 3600,
                )? * 3600,
            ),
            command_timeout: Duration::from_secs(env_parsed(
                "TUBARR_COMMAND_TIMEOUT_SECS",
                defaults.command_timeout.as_secs(),
            )?),
            termination_grace: Duration::from_secs(env_parsed(
                "TUBARR_TERMINATION_GRACE_SECS",
                defaults.termination_grace.as_secs(),
            )?),
            downloader_path: env_or(
                "TUBARR_DOWNLOADER",
                defaults.downloader_path.display().to_string(),
            )
            .into(),
            postprocessor_path: env_or(
                "TUBARR_POSTPROCESSOR",
                defaults.postprocessor_path.display().to_string(),
            )
            .into(),
            secret_key: env_or("TUBARR_SECRET_KEY", defaults.secret_key),
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            crate::Error::config(format!("invalid value for {key}: '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}
