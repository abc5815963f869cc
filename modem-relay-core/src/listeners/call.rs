//! Incoming call notifications

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Listener, ListenerContext};
use crate::bus::{CALL_DIRECTION_OUTGOING, CALL_INTERFACE, VOICE_INTERFACE};
use crate::Result;

/// Forwards incoming `Voice.CallAdded` calls as a chat notification
///
/// Outgoing calls are skipped. A call whose direction cannot be read is
/// treated as incoming.
pub struct CallListener;

#[async_trait]
impl Listener for CallListener {
    fn name(&self) -> &'static str {
        "call"
    }

    fn interface(&self) -> &'static str {
        VOICE_INTERFACE
    }

    fn signal(&self) -> &'static str {
        "CallAdded"
    }

    async fn handle(&self, ctx: &ListenerContext, object: &str) -> Result<()> {
        let direction = ctx
            .source
            .bus
            .property(object, CALL_INTERFACE, "Direction")
            .await
            .ok()
            .and_then(|v| v.as_u64());
        if direction == Some(u64::from(CALL_DIRECTION_OUTGOING)) {
            debug!("Skipping outgoing call {}", object);
            return Ok(());
        }

        let number = ctx.read_text(object, CALL_INTERFACE, "Number").await?;
        let number = if number.is_empty() {
            "unknown number".to_string()
        } else {
            number
        };
        info!("Incoming call from {} ({})", number, object);

        ctx.notify(&format!("Incoming call\nFrom: {}", number))
            .await
    }
}
