//! Desktop Notifications
//!
//! Shows call and SMS events as desktop notifications through the
//! freedesktop.org `org.freedesktop.Notifications` service on the session bus.

use anyhow::{Context, Result};
use async_trait::async_trait;
use modem_relay_core::{ChatId, ChatTransport, TransportError};
use std::collections::HashMap;
use tracing::debug;
use zbus::zvariant::Value;
use zbus::Connection;

const NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const APP_NAME: &str = "Modem Relay";
const ICON: &str = "phone-symbolic";
const TIMEOUT_MS: i32 = 10_000;

/// Notification client on the session bus
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    connection: Connection,
}

/// Split a relay message into notification summary and body
///
/// The first line is the summary, the remaining lines (leading blank lines
/// removed) are the body.
pub fn split_message(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((summary, body)) => (summary, body.trim_start_matches('\n')),
        None => (text, ""),
    }
}

impl DesktopNotifier {
    /// Connect to the session bus
    pub async fn new() -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to session DBus")?;

        debug!("Connected to desktop notifications service");
        Ok(Self { connection })
    }

    /// Show one notification, returning its id
    pub async fn send(&self, summary: &str, body: &str) -> Result<u32> {
        let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
        hints.insert("urgency", Value::U8(1));
        hints.insert("category", Value::from("im.received"));
        let actions: Vec<&str> = Vec::new();

        let notification_id: u32 = self
            .connection
            .call_method(
                Some(NOTIFICATIONS_SERVICE),
                NOTIFICATIONS_PATH,
                Some(NOTIFICATIONS_SERVICE),
                "Notify",
                &(APP_NAME, 0u32, ICON, summary, body, actions, hints, TIMEOUT_MS),
            )
            .await
            .context("Failed to send notification")?
            .body()
            .deserialize()
            .context("Failed to parse notification ID")?;

        debug!("Sent notification '{}' with ID {}", summary, notification_id);
        Ok(notification_id)
    }
}

#[async_trait]
impl ChatTransport for DesktopNotifier {
    async fn deliver(&self, chat: ChatId, text: &str) -> std::result::Result<(), TransportError> {
        let (summary, body) = split_message(text);
        self.send(summary, body)
            .await
            .map(|_| ())
            .map_err(|e| TransportError {
                chat,
                reason: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sms_notification() {
        let (summary, body) = split_message("New SMS\nFrom: +15550100\n\nhello");
        assert_eq!(summary, "New SMS");
        assert_eq!(body, "From: +15550100\n\nhello");
    }

    #[test]
    fn test_split_single_line() {
        assert_eq!(split_message("Incoming call"), ("Incoming call", ""));
    }

    #[tokio::test]
    #[ignore = "Requires a session bus with a notification daemon"]
    async fn test_send_notification() {
        let notifier = DesktopNotifier::new().await.unwrap();
        let id = notifier.send("Incoming call", "From: +15550100").await.unwrap();
        assert!(id > 0);
    }
}
