//! Bot-block detection and per-channel block state.
//!
//! Hosts signal automated-access refusal through well-known stderr
//! substrings or generic 403/429 markers. The controller does not inspect
//! output itself; callers match against [`BotBlockSignatures`] and tell the
//! controller, which persists the block through the channel repository's
//! atomic settings mutator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::Result;
use crate::database::repositories::ChannelRepository;
use crate::domain::{ChannelRef, ChannelSettings};

/// Default cooldown before a blocked host becomes eligible again.
pub const DEFAULT_BOT_BLOCK_COOLDOWN: Duration = Duration::from_secs(12 * 3600);

/// Substring table matched against stderr tails.
#[derive(Debug, Clone)]
pub struct BotBlockSignatures {
    /// Matched for every host.
    generic: Vec<String>,
    /// Extra signatures for specific hosts.
    per_host: HashMap<String, Vec<String>>,
}

impl Default for BotBlockSignatures {
    fn default() -> Self {
        Self {
            generic: [
                "sign in to confirm you're not a bot",
                "http error 403",
                "http error 429",
                "429 too many requests",
                "403 forbidden",
                "access denied",
                "captcha",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            per_host: HashMap::new(),
        }
    }
}

impl BotBlockSignatures {
    pub fn with_host_signatures(
        mut self,
        hostname: impl Into<String>,
        signatures: Vec<String>,
    ) -> Self {
        self.per_host.insert(hostname.into(), signatures);
        self
    }

    /// Whether `stderr_tail` carries a bot-block signature for `hostname`.
    ///
    /// Matching is case-insensitive; an empty tail never matches.
    pub fn matches(&self, hostname: &str, stderr_tail: &str) -> bool {
        if stderr_tail.is_empty() {
            return false;
        }
        let haystack = stderr_tail.to_lowercase();

        if self
            .generic
            .iter()
            .any(|sig| haystack.contains(&sig.to_lowercase()))
        {
            return true;
        }
        self.per_host
            .get(hostname)
            .is_some_and(|sigs| sigs.iter().any(|sig| haystack.contains(&sig.to_lowercase())))
    }
}

/// Tracks per-channel, per-hostname block state.
pub struct BotBlockController<C: ChannelRepository> {
    channel_repo: Arc<C>,
    cooldown: Duration,
}

impl<C: ChannelRepository> BotBlockController<C> {
    pub fn new(channel_repo: Arc<C>, cooldown: Duration) -> Self {
        Self {
            channel_repo,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether a block record for `hostname` exists and is still inside the
    /// cooldown window.
    pub fn is_blocked(&self, settings: &ChannelSettings, hostname: &str, now: DateTime<Utc>) -> bool {
        settings.host_bot_blocked(hostname, now, self.cooldown)
    }

    /// Whether the channel as a whole should be skipped by the scheduler.
    pub fn is_channel_blocked(&self, settings: &ChannelSettings, now: DateTime<Utc>) -> bool {
        settings.is_bot_blocked(now, self.cooldown)
    }

    /// Persist a block record and raise the channel-wide flag.
    pub async fn mark_blocked(
        &self,
        channel_ref: &ChannelRef,
        hostname: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        warn!(
            channel = %channel_ref,
            hostname,
            "Marking channel bot-blocked; run `unblock` to clear"
        );
        let hostname = hostname.to_string();
        self.channel_repo
            .update_settings_json(channel_ref, &move |settings| {
                settings.record_bot_block(&hostname, ts);
            })
            .await
    }

    /// Clear the flag, the hostname set, and all timestamps.
    pub async fn unblock(&self, channel_ref: &ChannelRef) -> Result<()> {
        info!(channel = %channel_ref, "Clearing bot-block state");
        self.channel_repo
            .update_settings_json(channel_ref, &|settings| {
                settings.clear_bot_block();
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::crypto::PasswordCipher;
    use crate::database::repositories::SqlxChannelRepository;
    use crate::database::{init_pool, run_migrations};
    use crate::domain::NewChannel;

    #[test]
    fn generic_signatures_match_any_host() {
        let signatures = BotBlockSignatures::default();
        assert!(signatures.matches(
            "example.test",
            "ERROR: Sign in to confirm you're not a bot. Use --cookies"
        ));
        assert!(signatures.matches("other.test", "server said: HTTP Error 429"));
        assert!(!signatures.matches("example.test", "ERROR: video unavailable"));
        assert!(!signatures.matches("example.test", ""));
    }

    #[test]
    fn host_signatures_apply_to_that_host_only() {
        let signatures = BotBlockSignatures::default()
            .with_host_signatures("example.test", vec!["rate limited, slow down".to_string()]);
        assert!(signatures.matches("example.test", "rate limited, slow down"));
        assert!(!signatures.matches("other.test", "rate limited, slow down"));
    }

    #[tokio::test]
    async fn mark_and_unblock_round_trip() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxChannelRepository::new(
            pool,
            PasswordCipher::from_secret("test"),
        ));
        let id = repo
            .add_channel(&NewChannel {
                name: "demo".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let channel_ref = ChannelRef::Id(id);

        let controller = BotBlockController::new(repo.clone(), DEFAULT_BOT_BLOCK_COOLDOWN);
        let now = Utc::now();
        controller
            .mark_blocked(&channel_ref, "example.test", now)
            .await
            .unwrap();

        let channel = repo.get_by_ref(&channel_ref).await.unwrap();
        assert!(controller.is_blocked(&channel.settings, "example.test", now));
        assert!(controller.is_channel_blocked(&channel.settings, now));
        assert!(!controller.is_blocked(&channel.settings, "other.test", now));

        // Past the cooldown the host is eligible again without unblocking.
        let later = now + chrono::Duration::hours(13);
        assert!(!controller.is_blocked(&channel.settings, "example.test", later));
        assert!(!controller.is_channel_blocked(&channel.settings, later));

        controller.unblock(&channel_ref).await.unwrap();
        let channel = repo.get_by_ref(&channel_ref).await.unwrap();
        assert_eq!(channel.settings.bot_blocked, Some(false));
        assert!(channel.settings.bot_blocked_timestamps.is_none());
        assert!(!controller.is_blocked(&channel.settings, "example.test", now));
    }
}
