//! Crawl/download policy record and its merge semantics.
//!
//! Every recognized option is optional so "not set" is distinguishable from
//! "set to zero": per-URL overrides merge field-wise over channel-level
//! settings, with `None` falling through. Unknown keys in persisted blobs
//! are captured in `extra` and written back verbatim.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filter::{FilterRule, MoveOp};

/// Default gap between scheduled crawls when none is configured.
const DEFAULT_CRAWL_FREQ_MINUTES: i64 = 30;

/// Default per-video retry budget on transient failure.
const DEFAULT_RETRIES: u32 = 1;

/// Resolved crawl cadence for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlFrequency {
    /// Channel is never auto-crawled (explicit commands still work).
    Disabled,
    /// Minimum gap between scheduled crawls.
    Every(Duration),
}

/// Crawl/download policy for a channel or a single channel URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Minutes between scheduled crawls; `< 0` means "use the default",
    /// `0` disables scheduled crawls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_freq: Option<i64>,
    /// Max concurrent downloads for this channel (clamped to >= 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Per-video retry budget on transient failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Normalized size literal (e.g. `500M`) passed to the downloader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_filesize: Option<String>,
    /// Inclusive upload-date lower bound, `YYYYMMDD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    /// Inclusive upload-date upper bound, `YYYYMMDD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
    /// Inclusion rules evaluated against fetched metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterRule>>,
    /// Post-processor routing rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_ops: Option<Vec<MoveOp>>,
    /// Skipped by the scheduler, still crawlable via explicit command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    /// Channel-wide bot-block flag; see the hostname records below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_blocked_hostnames: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_blocked_timestamps: Option<BTreeMap<String, DateTime<Utc>>>,
    /// Browser hint forwarded to the external downloader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_from_browser: Option<String>,
    /// Merge the user's browser cookie store into resolved cookies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_global_cookies: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_downloader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_downloader_args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_ytdlp_video_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_ytdlp_meta_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_dir: Option<PathBuf>,

    /// Unknown keys, preserved across read-modify-write cycles.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

macro_rules! override_field {
    ($merged:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $merged.$field = $other.$field.clone();
            }
        )+
    };
}

impl ChannelSettings {
    /// Field-level merge: any field set on `other` replaces the base value,
    /// `None` falls through.
    pub fn merged_with(&self, other: Option<&ChannelSettings>) -> ChannelSettings {
        let Some(other) = other else {
            return self.clone();
        };

        let mut merged = self.clone();
        override_field!(
            merged,
            other,
            crawl_freq,
            concurrency,
            retries,
            max_filesize,
            from_date,
            to_date,
            filters,
            move_ops,
            paused,
            bot_blocked,
            bot_blocked_hostnames,
            bot_blocked_timestamps,
            cookies_from_browser,
            use_global_cookies,
            external_downloader,
            external_downloader_args,
            extra_ytdlp_video_args,
            extra_ytdlp_meta_args,
            video_dir,
            json_dir,
        );
        for (key, value) in &other.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Resolved crawl cadence: unset or negative falls back to the default,
    /// zero disables scheduled crawls.
    pub fn effective_crawl_freq(&self) -> CrawlFrequency {
        match self.crawl_freq {
            Some(0) => CrawlFrequency::Disabled,
            Some(minutes) if minutes > 0 => {
                CrawlFrequency::Every(Duration::from_secs(minutes as u64 * 60))
            }
            _ => CrawlFrequency::Every(Duration::from_secs(
                DEFAULT_CRAWL_FREQ_MINUTES as u64 * 60,
            )),
        }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(1).max(1) as usize
    }

    pub fn effective_retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.unwrap_or(false)
    }

    pub fn uses_global_cookies(&self) -> bool {
        self.use_global_cookies.unwrap_or(false)
    }

    /// Destination directory for downloaded video files.
    pub fn output_video_dir(&self) -> PathBuf {
        self.video_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    /// Destination directory for metadata sidecars; falls back to the video
    /// directory.
    pub fn output_json_dir(&self) -> PathBuf {
        self.json_dir.clone().unwrap_or_else(|| self.output_video_dir())
    }

    pub fn filter_rules(&self) -> &[FilterRule] {
        self.filters.as_deref().unwrap_or(&[])
    }

    pub fn move_op_rules(&self) -> &[MoveOp] {
        self.move_ops.as_deref().unwrap_or(&[])
    }

    /// Whether a specific host is currently suppressed by a bot-block record.
    pub fn host_bot_blocked(&self, hostname: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let Some(timestamps) = &self.bot_blocked_timestamps else {
            return false;
        };
        match timestamps.get(hostname) {
            Some(ts) => {
                let elapsed = now.signed_duration_since(*ts);
                elapsed < chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX)
            }
            None => false,
        }
    }

    /// Whether the channel as a whole is bot-blocked: the flag is raised and
    /// at least one recorded host is still inside its cooldown.
    pub fn is_bot_blocked(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if !self.bot_blocked.unwrap_or(false) {
            return false;
        }
        self.bot_blocked_timestamps
            .as_ref()
            .is_some_and(|timestamps| {
                timestamps
                    .keys()
                    .any(|host| self.host_bot_blocked(host, now, cooldown))
            })
    }

    /// Record a bot block against `hostname` at `ts`.
    pub fn record_bot_block(&mut self, hostname: &str, ts: DateTime<Utc>) {
        self.bot_blocked = Some(true);
        self.bot_blocked_hostnames
            .get_or_insert_with(BTreeSet::new)
            .insert(hostname.to_string());
        self.bot_blocked_timestamps
            .get_or_insert_with(BTreeMap::new)
            .insert(hostname.to_string(), ts);
    }

    /// Clear the flag, the hostname set, and all timestamps.
    pub fn clear_bot_block(&mut self) {
        self.bot_blocked = Some(false);
        self.bot_blocked_hostnames = None;
        self.bot_blocked_timestamps = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: u64) -> CrawlFrequency {
        CrawlFrequency::Every(Duration::from_secs(m * 60))
    }

    #[test]
    fn crawl_freq_defaults_and_disables() {
        let mut s = ChannelSettings::default();
        assert_eq!(s.effective_crawl_freq(), minutes(30));

        s.crawl_freq = Some(-5);
        assert_eq!(s.effective_crawl_freq(), minutes(30));

        s.crawl_freq = Some(0);
        assert_eq!(s.effective_crawl_freq(), CrawlFrequency::Disabled);

        s.crawl_freq = Some(90);
        assert_eq!(s.effective_crawl_freq(), minutes(90));
    }

    #[test]
    fn concurrency_clamps_to_one() {
        let mut s = ChannelSettings::default();
        assert_eq!(s.effective_concurrency(), 1);
        s.concurrency = Some(0);
        assert_eq!(s.effective_concurrency(), 1);
        s.concurrency = Some(6);
        assert_eq!(s.effective_concurrency(), 6);
    }

    #[test]
    fn merge_overrides_set_fields_only() {
        let base = ChannelSettings {
            crawl_freq: Some(60),
            concurrency: Some(2),
            max_filesize: Some("500M".to_string()),
            ..Default::default()
        };
        let per_url = ChannelSettings {
            concurrency: Some(4),
            ..Default::default()
        };

        let merged = base.merged_with(Some(&per_url));
        assert_eq!(merged.crawl_freq, Some(60));
        assert_eq!(merged.concurrency, Some(4));
        assert_eq!(merged.max_filesize, Some("500M".to_string()));
    }

    #[test]
    fn merge_with_none_is_identity() {
        let base = ChannelSettings {
            retries: Some(3),
            paused: Some(true),
            ..Default::default()
        };
        assert_eq!(base.merged_with(None), base);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let blob = r#"{"crawl_freq":15,"future_option":{"nested":true}}"#;
        let parsed: ChannelSettings = serde_json::from_str(blob).unwrap();
        assert_eq!(parsed.crawl_freq, Some(15));
        assert!(parsed.extra.contains_key("future_option"));

        let out = serde_json::to_string(&parsed).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed["future_option"]["nested"], true);
    }

    #[test]
    fn bot_block_records_and_cooldown() {
        let now = Utc::now();
        let cooldown = Duration::from_secs(12 * 3600);
        let mut s = ChannelSettings::default();
        assert!(!s.is_bot_blocked(now, cooldown));

        s.record_bot_block("example.test", now - chrono::Duration::hours(1));
        assert!(s.host_bot_blocked("example.test", now, cooldown));
        assert!(!s.host_bot_blocked("other.test", now, cooldown));
        assert!(s.is_bot_blocked(now, cooldown));

        // An expired record no longer blocks the channel.
        s.bot_blocked_timestamps
            .as_mut()
            .unwrap()
            .insert("example.test".to_string(), now - chrono::Duration::hours(13));
        assert!(!s.is_bot_blocked(now, cooldown));

        s.clear_bot_block();
        assert_eq!(s.bot_blocked, Some(false));
        assert!(s.bot_blocked_hostnames.is_none());
        assert!(s.bot_blocked_timestamps.is_none());
    }
}
