//! Slack Notifier Adapter
//!
//! Implements the `ScaleNotifier` port with a Slack incoming webhook.
//! Delivery is best effort: failures are logged and swallowed, never
//! retried, and never block the reconciliation loop.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::ports::{ResizeEvent, ScaleNotifier};

/// Configuration for the Slack notifier.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    /// Incoming-webhook URL; `None` disables the notifier
    pub webhook_url: Option<String>,

    /// Optional channel override
    pub channel: Option<String>,

    /// Text prepended to every message
    pub message_prefix: String,

    /// Text appended to every message
    pub message_suffix: String,

    /// Request timeout
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    text: String,
}

/// Webhook-backed notifier.
pub struct SlackNotifier {
    config: SlackConfig,
    client: Option<reqwest::Client>,
}

impl SlackNotifier {
    /// Create a notifier; disabled when no webhook URL is configured.
    pub fn new(config: SlackConfig) -> Self {
        let client = match &config.webhook_url {
            Some(url) if !url.is_empty() => reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| {
                    warn!(error = %e, "Failed to create Slack HTTP client, notifications disabled");
                    e
                })
                .ok(),
            _ => None,
        };

        Self { config, client }
    }

    /// A notifier that never sends anything (dry-run, or webhook unset).
    pub fn disabled() -> Self {
        Self {
            config: SlackConfig::default(),
            client: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Render the message body for a resize event.
    fn render(&self, event: &ResizeEvent) -> String {
        let body = if event.succeeded {
            format!(
                "Resized PVC `{}` from {} to {} bytes",
                event.id, event.old_bytes, event.new_bytes
            )
        } else {
            format!(
                "Failed to resize PVC `{}` from {} to {} bytes",
                event.id, event.old_bytes, event.new_bytes
            )
        };

        let mut text = String::new();
        if !self.config.message_prefix.is_empty() {
            text.push_str(&self.config.message_prefix);
            text.push(' ');
        }
        text.push_str(&body);
        if !self.config.message_suffix.is_empty() {
            text.push(' ');
            text.push_str(&self.config.message_suffix);
        }
        text
    }
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackNotifier")
            .field("enabled", &self.is_enabled())
            .field("channel", &self.config.channel)
            .finish()
    }
}

#[async_trait]
impl ScaleNotifier for SlackNotifier {
    async fn notify(&self, event: &ResizeEvent) {
        let (client, url) = match (&self.client, &self.config.webhook_url) {
            (Some(client), Some(url)) => (client, url),
            _ => {
                debug!(pvc = %event.id, "Notifier disabled, skipping notification");
                return;
            }
        };

        let payload = SlackPayload {
            channel: self.config.channel.as_deref(),
            text: self.render(event),
        };

        match client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(pvc = %event.id, "Delivered scale notification");
            }
            Ok(response) => {
                warn!(
                    pvc = %event.id,
                    status = %response.status(),
                    "Slack webhook rejected notification"
                );
            }
            Err(e) => {
                warn!(pvc = %event.id, error = %e, "Failed to deliver scale notification");
            }
        }
    }
}

/// In-memory notifier for tests: records every event it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: parking_lot::RwLock<Vec<ResizeEvent>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResizeEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl ScaleNotifier for RecordingNotifier {
    async fn notify(&self, event: &ResizeEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PvcId;
    use chrono::Utc;

    fn event(succeeded: bool) -> ResizeEvent {
        ResizeEvent {
            id: PvcId::new("media", "library"),
            old_bytes: 10_000_000_000,
            new_bytes: 12_000_000_000,
            succeeded,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_disabled_without_webhook_url() {
        let notifier = SlackNotifier::new(SlackConfig::default());
        assert!(!notifier.is_enabled());

        let notifier = SlackNotifier::new(SlackConfig {
            webhook_url: Some(String::new()),
            ..Default::default()
        });
        assert!(!notifier.is_enabled());

        assert!(!SlackNotifier::disabled().is_enabled());
    }

    #[test]
    fn test_enabled_with_webhook_url() {
        let notifier = SlackNotifier::new(SlackConfig {
            webhook_url: Some("https://hooks.slack.com/services/T00/B00/xyz".to_string()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        });
        assert!(notifier.is_enabled());
    }

    #[test]
    fn test_render_success_and_failure() {
        let notifier = SlackNotifier::disabled();

        let text = notifier.render(&event(true));
        assert!(text.contains("Resized PVC `media/library`"));
        assert!(text.contains("10000000000"));
        assert!(text.contains("12000000000"));

        let text = notifier.render(&event(false));
        assert!(text.starts_with("Failed to resize"));
    }

    #[test]
    fn test_render_applies_prefix_and_suffix() {
        let notifier = SlackNotifier::new(SlackConfig {
            message_prefix: "[prod]".to_string(),
            message_suffix: "(autoscaler)".to_string(),
            ..Default::default()
        });

        let text = notifier.render(&event(true));
        assert!(text.starts_with("[prod] "));
        assert!(text.ends_with(" (autoscaler)"));
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_a_noop() {
        // Must return quickly and never panic
        SlackNotifier::disabled().notify(&event(true)).await;
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let notifier = SlackNotifier::new(SlackConfig {
            webhook_url: Some("http://localhost:19999/webhook".to_string()),
            timeout: Duration::from_secs(1),
            ..Default::default()
        });

        // Connection refused must not propagate
        notifier.notify(&event(true)).await;
    }

    #[tokio::test]
    async fn test_recording_notifier_collects() {
        let recorder = RecordingNotifier::new();
        assert!(recorder.is_empty());

        recorder.notify(&event(true)).await;
        recorder.notify(&event(false)).await;

        assert_eq!(recorder.len(), 2);
        assert!(recorder.events()[0].succeeded);
        assert!(!recorder.events()[1].succeeded);
    }
}
