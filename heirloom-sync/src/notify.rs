//! User-facing notification channel
//!
//! Every terminal failure and every region sync, outage or recovery event is
//! published here as a title/description pair. Presentation (toasts, alerts,
//! CLI output) is up to the subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// Cloneable handle over a broadcast channel of [`Notification`]s.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        description: impl Into<String>,
    ) {
        let notification = Notification {
            level,
            title: title.into(),
            description: description.into(),
            at: Utc::now(),
        };

        // Descriptions can carry family details typed by the user
        let logged = logger_redacted::redact(&notification.description);
        match level {
            NotificationLevel::Error => tracing::error!(
                title = %notification.title,
                description = %logged,
                "notification"
            ),
            NotificationLevel::Warning => tracing::warn!(
                title = %notification.title,
                description = %logged,
                "notification"
            ),
            _ => tracing::info!(
                title = %notification.title,
                description = %logged,
                "notification"
            ),
        }

        // No subscribers is fine: the event has already been logged.
        let _ = self.tx.send(notification);
    }

    pub fn info(&self, title: impl Into<String>, description: impl Into<String>) {
        self.notify(NotificationLevel::Info, title, description);
    }

    pub fn success(&self, title: impl Into<String>, description: impl Into<String>) {
        self.notify(NotificationLevel::Success, title, description);
    }

    pub fn warning(&self, title: impl Into<String>, description: impl Into<String>) {
        self.notify(NotificationLevel::Warning, title, description);
    }

    pub fn error(&self, title: impl Into<String>, description: impl Into<String>) {
        self.notify(NotificationLevel::Error, title, description);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_notification() {
        let notifier = Notifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.error("Sync failed", "eu-west-1 is unreachable");

        for rx in [&mut first, &mut second] {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.level, NotificationLevel::Error);
            assert_eq!(received.title, "Sync failed");
        }
    }

    #[test]
    fn test_notify_without_subscribers_does_not_panic() {
        let notifier = Notifier::new();
        notifier.success("Region synced", "us-west-1");
    }
}
