//! yt-dlp-compatible downloader implementation.
//!
//! Builds argument vectors from the effective settings, drives the external
//! binary through the command runner, and classifies failures into the
//! error taxonomy (bot-block signature match, retryable exit code, fatal).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::botblock::BotBlockSignatures;
use crate::command::{CommandOutcome, CommandRunner, CommandSpec, LineSink, discard_sink};
use crate::{Error, Result};

use super::progress::ProgressReporter;
use super::{Downloader, FetchRequest};

/// Configuration for the yt-dlp invocation layer.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub program: PathBuf,
    /// Soft timeout for listing and metadata commands.
    pub listing_timeout: Duration,
    /// Exit codes treated as transient (retryable) failures.
    pub retryable_exit_codes: Vec<i32>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            listing_timeout: Duration::from_secs(300),
            retryable_exit_codes: vec![1],
        }
    }
}

/// yt-dlp-backed [`Downloader`].
pub struct YtDlpDownloader {
    runner: CommandRunner,
    config: YtDlpConfig,
    signatures: Arc<BotBlockSignatures>,
}

impl YtDlpDownloader {
    pub fn new(
        runner: CommandRunner,
        config: YtDlpConfig,
        signatures: Arc<BotBlockSignatures>,
    ) -> Self {
        Self {
            runner,
            config,
            signatures,
        }
    }

    fn base_spec(&self, request: &FetchRequest) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.config.program).arg("--no-warnings");
        if let Some(cookie_file) = &request.cookie_file {
            spec = spec.arg("--cookies").arg(cookie_file.display().to_string());
        }
        if let Some(browser) = &request.settings.cookies_from_browser {
            spec = spec.arg("--cookies-from-browser").arg(browser.clone());
        }
        spec
    }

    /// Map a non-zero outcome to the error taxonomy.
    fn classify_failure(&self, hostname: &str, outcome: &CommandOutcome) -> Error {
        if self.signatures.matches(hostname, &outcome.stderr_tail) {
            return Error::bot_block(hostname);
        }
        let summary = failure_summary(outcome);
        match outcome.exit_code {
            Some(code) if self.config.retryable_exit_codes.contains(&code) => {
                Error::transient(summary)
            }
            _ => Error::fatal(summary),
        }
    }
}

fn failure_summary(outcome: &CommandOutcome) -> String {
    let last_line = outcome
        .stderr_tail
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no stderr output");
    format!(
        "downloader exited with {:?}: {last_line}",
        outcome.exit_code
    )
}

/// Arguments for the flat-playlist listing call.
pub(crate) fn listing_args(request: &FetchRequest) -> Vec<String> {
    let mut args = vec![
        "--no-progress".to_string(),
        "--flat-playlist".to_string(),
        "--print".to_string(),
        "url".to_string(),
    ];
    if let Some(extra) = &request.settings.extra_ytdlp_meta_args {
        args.extend(extra.iter().cloned());
    }
    args.push(request.url.clone());
    args
}

/// Arguments for the single-video metadata call.
pub(crate) fn metadata_args(request: &FetchRequest) -> Vec<String> {
    let mut args = vec![
        "--no-progress".to_string(),
        "--skip-download".to_string(),
        "--dump-json".to_string(),
    ];
    if let Some(extra) = &request.settings.extra_ytdlp_meta_args {
        args.extend(extra.iter().cloned());
    }
    args.push(request.url.clone());
    args
}

/// Arguments for the video download call.
pub(crate) fn video_args(request: &FetchRequest) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
    ];

    if let (Some(dir), Some(stem)) = (&request.output_dir, &request.output_stem) {
        args.push("-o".to_string());
        args.push(format!("{}/{stem}.%(ext)s", dir.display()));
    } else if let Some(dir) = &request.output_dir {
        args.push("-o".to_string());
        args.push(format!("{}/%(title)s.%(ext)s", dir.display()));
    }

    if let Some(max_filesize) = &request.settings.max_filesize {
        args.push("--max-filesize".to_string());
        args.push(max_filesize.clone());
    }
    if let Some(downloader) = &request.settings.external_downloader {
        args.push("--downloader".to_string());
        args.push(downloader.clone());
        if let Some(downloader_args) = &request.settings.external_downloader_args {
            args.push("--downloader-args".to_string());
            args.push(format!("{downloader}:{downloader_args}"));
        }
    }
    if let Some(extra) = &request.settings.extra_ytdlp_video_args {
        args.extend(extra.iter().cloned());
    }

    args.push(request.url.clone());
    args
}

fn collecting_sink(lines: Arc<Mutex<Vec<String>>>) -> LineSink {
    Box::new(move |line: &str| {
        lines.lock().expect("sink poisoned").push(line.to_string());
    })
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn list_urls(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<Vec<String>> {
        let spec = self
            .base_spec(request)
            .args(listing_args(request))
            .timeout(self.config.listing_timeout);

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let outcome = self
            .runner
            .run(cancel, spec, collecting_sink(stdout.clone()), discard_sink())
            .await?;

        if !outcome.success() {
            return Err(self.classify_failure(&request.hostname, &outcome));
        }

        let urls: Vec<String> = stdout
            .lock()
            .expect("sink poisoned")
            .iter()
            .map(|line| line.trim().to_string())
            .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
            .collect();
        debug!(url = %request.url, candidates = urls.len(), "Listing finished");
        Ok(urls)
    }

    async fn fetch_metadata(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<serde_json::Value> {
        let spec = self
            .base_spec(request)
            .args(metadata_args(request))
            .timeout(self.config.listing_timeout);

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let outcome = self
            .runner
            .run(cancel, spec, collecting_sink(stdout.clone()), discard_sink())
            .await?;

        if !outcome.success() {
            return Err(self.classify_failure(&request.hostname, &outcome));
        }

        let lines = stdout.lock().expect("sink poisoned");
        let json_line = lines
            .iter()
            .rev()
            .find(|line| line.trim_start().starts_with('{'))
            .ok_or_else(|| Error::transient("downloader produced no metadata record"))?;
        Ok(serde_json::from_str(json_line)?)
    }

    async fn fetch_video(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let spec = self.base_spec(request).args(video_args(request));

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let collected = stdout.clone();
        let reporter = progress.clone();
        let sink: LineSink = Box::new(move |line: &str| {
            reporter.observe_line(line);
            if !line.starts_with('[') && !line.trim().is_empty() {
                collected.lock().expect("sink poisoned").push(line.to_string());
            }
        });

        let outcome = self.runner.run(cancel, spec, sink, discard_sink()).await?;

        if !outcome.success() {
            return Err(self.classify_failure(&request.hostname, &outcome));
        }

        let path = stdout
            .lock()
            .expect("sink poisoned")
            .last()
            .map(|line| PathBuf::from(line.trim()))
            .ok_or_else(|| Error::transient("downloader did not report an output path"))?;
        progress.report(100.0);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelSettings;

    fn request_with(settings: ChannelSettings) -> FetchRequest {
        FetchRequest {
            settings,
            output_dir: Some(PathBuf::from("/videos/demo")),
            output_stem: Some("clip".to_string()),
            ..FetchRequest::new("https://example.test/v/1", "example.test")
        }
    }

    #[test]
    fn listing_args_are_flat_playlist() {
        let args = listing_args(&FetchRequest::new("https://example.test/u/a", "example.test"));
        assert!(args.contains(&"--flat-playlist".to_string()));
        assert!(args.contains(&"url".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.test/u/a");
    }

    #[test]
    fn video_args_carry_passthrough_options() {
        let settings = ChannelSettings {
            max_filesize: Some("500M".to_string()),
            external_downloader: Some("aria2c".to_string()),
            external_downloader_args: Some("-x 4".to_string()),
            extra_ytdlp_video_args: Some(vec!["--embed-thumbnail".to_string()]),
            ..Default::default()
        };
        let args = video_args(&request_with(settings));

        assert!(args.contains(&"--max-filesize".to_string()));
        assert!(args.contains(&"500M".to_string()));
        assert!(args.contains(&"aria2c".to_string()));
        assert!(args.contains(&"aria2c:-x 4".to_string()));
        assert!(args.contains(&"--embed-thumbnail".to_string()));
        assert!(args.contains(&"/videos/demo/clip.%(ext)s".to_string()));
    }

    #[test]
    fn classification_prefers_bot_block_over_exit_code() {
        let downloader = YtDlpDownloader::new(
            CommandRunner::default(),
            YtDlpConfig::default(),
            Arc::new(BotBlockSignatures::default()),
        );

        let blocked = CommandOutcome {
            exit_code: Some(1),
            stderr_tail: "ERROR: Sign in to confirm you're not a bot".to_string(),
        };
        assert!(
            downloader
                .classify_failure("example.test", &blocked)
                .is_bot_block()
        );

        let transient = CommandOutcome {
            exit_code: Some(1),
            stderr_tail: "ERROR: unable to download video data".to_string(),
        };
        assert!(
            downloader
                .classify_failure("example.test", &transient)
                .is_transient()
        );

        let fatal = CommandOutcome {
            exit_code: Some(2),
            stderr_tail: "Usage: yt-dlp [OPTIONS]".to_string(),
        };
        assert!(matches!(
            downloader.classify_failure("example.test", &fatal),
            Error::Fatal(_)
        ));
    }
}
