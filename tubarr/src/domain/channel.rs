//! Channel and channel-URL entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metarr::MetarrArgs;
use super::settings::ChannelSettings;

/// How callers refer to a channel: by id, unique name, or member URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Id(i64),
    Name(String),
    Url(String),
}

impl ChannelRef {
    /// Parse a free-form reference: numeric strings become ids, anything
    /// with a scheme separator becomes a URL, the rest is a name.
    pub fn parse(raw: &str) -> ChannelRef {
        if let Ok(id) = raw.parse::<i64>() {
            return ChannelRef::Id(id);
        }
        if raw.contains("://") {
            return ChannelRef::Url(raw.to_string());
        }
        ChannelRef::Name(raw.to_string())
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRef::Id(id) => write!(f, "#{id}"),
            ChannelRef::Name(name) => f.write_str(name),
            ChannelRef::Url(url) => f.write_str(url),
        }
    }
}

/// Authentication triple attached to a channel URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAuth {
    pub username: String,
    /// Encrypted at rest by the store.
    pub password: String,
    pub login_url: String,
}

/// One discoverable endpoint inside a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUrl {
    pub id: i64,
    pub channel_id: i64,
    pub url: String,
    pub auth: Option<ChannelAuth>,
    /// Per-URL override, merged field-wise over channel-level settings.
    pub settings: Option<ChannelSettings>,
    pub metarr: Option<MetarrArgs>,
    pub last_scan: Option<DateTime<Utc>>,
    pub is_manual: bool,
}

/// A logical collection of channel URLs owned by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub urls: Vec<ChannelUrl>,
    pub settings: ChannelSettings,
    pub metarr: MetarrArgs,
    pub last_scan: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Effective settings for a member URL: per-URL override over
    /// channel-level, `None` fields falling through.
    pub fn effective_settings(&self, url: &ChannelUrl) -> ChannelSettings {
        self.settings.merged_with(url.settings.as_ref())
    }

    /// Effective post-processor args for a member URL.
    pub fn effective_metarr(&self, url: &ChannelUrl) -> MetarrArgs {
        self.metarr.merged_with(url.metarr.as_ref())
    }
}

/// Input for creating a channel; the store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub urls: Vec<NewChannelUrl>,
    pub settings: ChannelSettings,
    pub metarr: MetarrArgs,
}

/// Input for one member URL of a new channel.
#[derive(Debug, Clone, Default)]
pub struct NewChannelUrl {
    pub url: String,
    pub auth: Option<ChannelAuth>,
    pub settings: Option<ChannelSettings>,
    pub metarr: Option<MetarrArgs>,
    pub is_manual: bool,
}

/// A notification endpoint configured for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyTarget {
    pub url: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_refs() {
        assert_eq!(ChannelRef::parse("42"), ChannelRef::Id(42));
        assert_eq!(
            ChannelRef::parse("https://example.test/u/a"),
            ChannelRef::Url("https://example.test/u/a".to_string())
        );
        assert_eq!(
            ChannelRef::parse("demo"),
            ChannelRef::Name("demo".to_string())
        );
    }

    #[test]
    fn effective_settings_merge_per_url() {
        let now = Utc::now();
        let channel = Channel {
            id: 1,
            name: "demo".to_string(),
            urls: Vec::new(),
            settings: ChannelSettings {
                concurrency: Some(2),
                retries: Some(3),
                ..Default::default()
            },
            metarr: MetarrArgs::default(),
            last_scan: None,
            created_at: now,
            updated_at: now,
        };
        let url = ChannelUrl {
            id: 10,
            channel_id: 1,
            url: "https://example.test/u/a".to_string(),
            auth: None,
            settings: Some(ChannelSettings {
                concurrency: Some(5),
                ..Default::default()
            }),
            metarr: None,
            last_scan: None,
            is_manual: false,
        };

        let eff = channel.effective_settings(&url);
        assert_eq!(eff.concurrency, Some(5));
        assert_eq!(eff.retries, Some(3));
    }
}
