//! Incoming SMS forwarding

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Listener, ListenerContext};
use crate::bus::{BusSignal, PropValue, MESSAGING_INTERFACE, SMS_INTERFACE};
use crate::engine::format_timestamp;
use crate::Result;

/// Forwards `Messaging.Added` messages to the notification chat
///
/// Only received messages are forwarded; `Added` with `received = false`
/// announces a message created locally by `/sendsms`. The message is removed
/// from the modem only after the chat transport confirmed delivery. A failed
/// delivery leaves it stored for `/sms`.
pub struct SmsListener {
    delete_after_forward: bool,
}

impl SmsListener {
    pub fn new(delete_after_forward: bool) -> Self {
        Self {
            delete_after_forward,
        }
    }
}

#[async_trait]
impl Listener for SmsListener {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn interface(&self) -> &'static str {
        MESSAGING_INTERFACE
    }

    fn signal(&self) -> &'static str {
        "Added"
    }

    fn accepts(&self, signal: &BusSignal) -> bool {
        signal.args.get(1).and_then(PropValue::as_bool) != Some(false)
    }

    async fn handle(&self, ctx: &ListenerContext, object: &str) -> Result<()> {
        let sender = ctx.read_text(object, SMS_INTERFACE, "Number").await?;
        let body = ctx.read_text(object, SMS_INTERFACE, "Text").await?;

        let timestamp = match ctx.read_text(object, SMS_INTERFACE, "Timestamp").await {
            Ok(ts) if !ts.is_empty() => Some(format_timestamp(&ts)),
            Ok(_) => None,
            Err(e) => {
                debug!("No timestamp for {}: {}", object, e);
                None
            }
        };
        let reference = ctx
            .source
            .bus
            .property(object, SMS_INTERFACE, "MessageReference")
            .await
            .ok()
            .and_then(|v| v.as_u64());

        let mut text = format!("New SMS\nFrom: {}\n\n{}", sender, body);
        if let Some(ts) = timestamp {
            text.push_str(&format!("\n\nTime: {}", ts));
        }
        if let Some(reference) = reference.filter(|r| *r != 0) {
            text.push_str(&format!("\nRef: {}", reference));
        }

        ctx.notify(&text).await?;
        info!("Forwarded SMS {} from {}", object, sender);

        if self.delete_after_forward {
            let modem = ctx.source.modem.as_str();
            match ctx.source.bus.messaging_delete(modem, object).await {
                Ok(()) => debug!("Deleted forwarded SMS {}", object),
                Err(e) => warn!("Failed to delete forwarded SMS {}: {}", object, e),
            }
        }
        Ok(())
    }
}
