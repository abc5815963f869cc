//! Chat transport seam
//!
//! The relay never talks to a chat service directly. Replies and event
//! notifications go out through a [`ChatTransport`]; commands come in as
//! [`CommandRequest`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Chat identifier of the underlying messaging service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery failure reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to chat {chat} failed: {reason}")]
pub struct TransportError {
    pub chat: ChatId,
    pub reason: String,
}

impl From<TransportError> for crate::EngineError {
    fn from(error: TransportError) -> Self {
        crate::EngineError::Transport(error.to_string())
    }
}

/// Outbound side of the chat service
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), TransportError>;
}

/// One inbound chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command name without the leading slash, lowercased
    pub command: String,
    /// Everything after the command name, trimmed
    pub args: String,
    pub chat: ChatId,
}

impl CommandRequest {
    /// Parse `/name args`; `None` for text that is not a command
    ///
    /// A `@botname` suffix on the command is dropped.
    ///
    /// ```rust
    /// use modem_relay_core::{ChatId, CommandRequest};
    ///
    /// let req = CommandRequest::parse("/sendsms +4917012345 see you at 8", ChatId(7)).unwrap();
    /// assert_eq!(req.command, "sendsms");
    /// assert_eq!(req.args, "+4917012345 see you at 8");
    /// assert!(CommandRequest::parse("hello", ChatId(7)).is_none());
    /// ```
    pub fn parse(text: &str, chat: ChatId) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let command = head.split('@').next().unwrap_or(head).to_lowercase();
        if command.is_empty() {
            return None;
        }

        Some(Self {
            command,
            args: args.to_string(),
            chat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_bot_suffix() {
        let req = CommandRequest::parse("/Status@modem_bot", ChatId(-100)).unwrap();
        assert_eq!(req.command, "status");
        assert_eq!(req.args, "");
        assert_eq!(req.chat, ChatId(-100));
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert!(CommandRequest::parse("", ChatId(1)).is_none());
        assert!(CommandRequest::parse("/", ChatId(1)).is_none());
        assert!(CommandRequest::parse("status", ChatId(1)).is_none());
    }

    #[test]
    fn test_transport_error_converts() {
        let error: crate::EngineError = TransportError {
            chat: ChatId(5),
            reason: "offline".to_string(),
        }
        .into();
        assert!(matches!(error, crate::EngineError::Transport(ref m) if m.contains("offline")));
    }
}
