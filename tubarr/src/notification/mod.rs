//! Fire-and-forget completion notifications.
//!
//! Each configured notify URL for a channel receives a JSON POST when a
//! video completes. Delivery is best-effort: failures are logged and never
//! affect the pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::NotifyTarget;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// How many notification POSTs run at once.
const NOTIFY_CONCURRENCY: usize = 4;

/// Payload posted to notify URLs.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyEvent {
    pub channel_name: String,
    pub video_title: String,
    pub video_url: String,
    pub video_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotifyEvent {
    pub fn video_completed(
        channel_name: impl Into<String>,
        video_title: impl Into<String>,
        video_url: impl Into<String>,
        video_path: Option<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            video_title: video_title.into(),
            video_url: video_url.into(),
            video_path,
            timestamp: Utc::now(),
        }
    }
}

/// Posts events to notify URLs without waiting for the outcome.
pub struct NotificationDispatcher {
    client: reqwest::Client,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Enqueue one POST per target; returns immediately.
    pub fn dispatch(&self, targets: &[NotifyTarget], event: &NotifyEvent) {
        if targets.is_empty() {
            return;
        }

        let client = self.client.clone();
        let targets = targets.to_vec();
        let event = event.clone();
        tokio::spawn(async move {
            stream::iter(targets)
                .for_each_concurrent(NOTIFY_CONCURRENCY, |target| {
                    let client = client.clone();
                    let event = event.clone();
                    async move {
                        match client.post(&target.url).json(&event).send().await {
                            Ok(response) if response.status().is_success() => {
                                debug!(target = %target.name, "Notification delivered");
                            }
                            Ok(response) => {
                                warn!(
                                    target = %target.name,
                                    status = %response.status(),
                                    "Notification endpoint returned an error status"
                                );
                            }
                            Err(e) => {
                                warn!(
                                    target = %target.name,
                                    error = %e,
                                    "Notification delivery failed"
                                );
                            }
                        }
                    }
                })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_channel_context() {
        let event = NotifyEvent::video_completed(
            "demo",
            "clip title",
            "https://example.test/v/1",
            Some("/library/clip.mp4".to_string()),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel_name"], "demo");
        assert_eq!(json["video_title"], "clip title");
        assert_eq!(json["video_path"], "/library/clip.mp4");
    }

    #[tokio::test]
    async fn dispatch_with_no_targets_is_a_no_op() {
        let dispatcher = NotificationDispatcher::new();
        let event = NotifyEvent::video_completed("demo", "t", "u", None);
        dispatcher.dispatch(&[], &event);
    }
}
