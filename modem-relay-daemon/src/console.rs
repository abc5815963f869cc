//! Console Chat Transport
//!
//! Stands in for a chat service: commands are read from stdin, replies and
//! notifications are printed to stdout.
//!
//! ## Input Lines
//!
//! - `/command args` runs a command as the admin chat
//! - `@<chat> /command args` runs it as another chat
//! - `!sms <number> <text>` and `!ring <number>` inject inbound events into
//!   the simulated modem

use async_trait::async_trait;
use modem_relay_core::{ChatId, ChatTransport, CommandRequest, TransportError};
use std::io::Write;
use tracing::debug;

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(CommandRequest),
    InjectSms { number: String, text: String },
    InjectCall { number: String },
    Empty,
    Invalid(String),
}

impl ConsoleInput {
    /// Parse a line typed by the operator; commands default to `default_chat`
    pub fn parse(line: &str, default_chat: ChatId) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleInput::Empty;
        }

        if let Some(rest) = line.strip_prefix('!') {
            return Self::parse_injection(rest);
        }

        let (chat, text) = match line.strip_prefix('@') {
            Some(rest) => {
                let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                match id.parse::<i64>() {
                    Ok(id) => (ChatId(id), text),
                    Err(_) => return ConsoleInput::Invalid(format!("'{}' is not a chat id", id)),
                }
            }
            None => (default_chat, line),
        };

        match CommandRequest::parse(text, chat) {
            Some(request) => ConsoleInput::Command(request),
            None => ConsoleInput::Invalid("commands start with '/', try /help".to_string()),
        }
    }

    fn parse_injection(rest: &str) -> Self {
        let mut parts = rest.splitn(3, char::is_whitespace);
        let kind = parts.next().unwrap_or("");
        let number = parts.next().unwrap_or("").to_string();
        let text = parts.next().unwrap_or("").trim().to_string();

        match kind {
            "sms" if !number.is_empty() && !text.is_empty() => {
                ConsoleInput::InjectSms { number, text }
            }
            "sms" => ConsoleInput::Invalid("usage: !sms <number> <text>".to_string()),
            "ring" => ConsoleInput::InjectCall { number },
            other => ConsoleInput::Invalid(format!("unknown event '!{}', use !sms or !ring", other)),
        }
    }
}

/// [`ChatTransport`] printing to stdout
#[derive(Debug, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        Self
    }

    /// Print a local message that did not come from a chat
    pub fn print(&self, text: &str) {
        println!("{}", text);
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "[chat {}]\n{}\n", chat, text)
            .and_then(|_| stdout.flush())
            .map_err(|e| TransportError {
                chat,
                reason: e.to_string(),
            })?;
        debug!("Delivered {} bytes to chat {}", text.len(), chat);
        Ok(())
    }
}
