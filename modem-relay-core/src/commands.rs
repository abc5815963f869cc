//! Chat Command Dispatcher
//!
//! Commands are looked up in an explicitly built [`CommandTable`] and run
//! against the shared engine. Every command produces exactly one reply;
//! failures are rendered with [`EngineError::user_message`].
//!
//! | command     | arguments             | admin |
//! |-------------|-----------------------|-------|
//! | `help`      |                       | no    |
//! | `getid`     |                       | no    |
//! | `status`    |                       | yes   |
//! | `sms`       |                       | yes   |
//! | `deletesms` | `<id>`                | yes   |
//! | `sendsms`   | `<number> <text>`     | yes   |
//! | `data`      | `on` \| `off`         | yes   |
//! | `switchsim` | `<slot>`              | yes   |
//! | `esim`      | `info` \| `power` \| `on` \| `off` | yes |

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::sms_cache::SmsReferenceCache;
use crate::transport::{ChatId, CommandRequest};
use crate::{EngineError, Result};

/// What a command does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    GetId,
    Status,
    Sms,
    DeleteSms,
    SendSms,
    Data,
    SwitchSim,
    Esim,
}

/// One entry of the command table
#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    pub admin_only: bool,
    pub kind: CommandKind,
}

impl Command {
    pub const fn new(
        name: &'static str,
        usage: &'static str,
        description: &'static str,
        admin_only: bool,
        kind: CommandKind,
    ) -> Self {
        Self {
            name,
            usage,
            description,
            admin_only,
            kind,
        }
    }

    fn help_line(&self) -> String {
        if self.usage.is_empty() {
            format!("/{} - {}", self.name, self.description)
        } else {
            format!("/{} {} - {}", self.name, self.usage, self.description)
        }
    }
}

/// Name to command table
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in command
    pub fn standard() -> Result<Self> {
        use CommandKind::*;

        let mut table = Self::new();
        for command in [
            Command::new("help", "", "show this help", false, Help),
            Command::new("getid", "", "show your chat id", false, GetId),
            Command::new("status", "", "modem status", true, Status),
            Command::new("sms", "", "list stored SMS", true, Sms),
            Command::new("deletesms", "<id>", "delete a listed SMS", true, DeleteSms),
            Command::new("sendsms", "<number> <text>", "send an SMS", true, SendSms),
            Command::new("data", "on|off", "toggle mobile data", true, Data),
            Command::new("switchsim", "<slot>", "switch SIM slot", true, SwitchSim),
            Command::new("esim", "info|power|on|off", "eSIM management over AT", true, Esim),
        ] {
            table.register(command)?;
        }
        Ok(table)
    }

    /// Add a command
    ///
    /// # Errors
    ///
    /// Returns error if the name is already taken.
    pub fn register(&mut self, command: Command) -> Result<()> {
        if self.commands.contains_key(command.name) {
            return Err(EngineError::Registry(format!(
                "Command '{}' is already registered",
                command.name
            )));
        }
        self.commands.insert(command.name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Commands sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }
}

/// Runs chat commands against the engine
pub struct Dispatcher {
    engine: Arc<dyn Engine>,
    cache: Arc<SmsReferenceCache>,
    table: CommandTable,
    admin_chat: ChatId,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn Engine>,
        cache: Arc<SmsReferenceCache>,
        table: CommandTable,
        admin_chat: ChatId,
    ) -> Self {
        Self {
            engine,
            cache,
            table,
            admin_chat,
        }
    }

    pub fn is_admin(&self, chat: ChatId) -> bool {
        chat == self.admin_chat
    }

    /// Reply for `request`, or `None` when the command is unknown
    pub async fn dispatch(&self, request: &CommandRequest) -> Option<String> {
        let command = self.table.get(&request.command)?;

        if command.admin_only && !self.is_admin(request.chat) {
            warn!(
                "Chat {} is not allowed to run /{}",
                request.chat, command.name
            );
            return Some("Not authorized.".to_string());
        }

        debug!("Chat {} runs /{} {}", request.chat, command.name, request.args);
        let reply = match self.run(command.kind, request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("/{} failed: {}", command.name, e);
                format!("/{} failed: {}", command.name, e.user_message())
            }
        };
        Some(reply)
    }

    async fn run(&self, kind: CommandKind, request: &CommandRequest) -> Result<String> {
        let args = request.args.trim();
        match kind {
            CommandKind::Help => Ok(self.help(request.chat)),
            CommandKind::GetId => Ok(format!("Your chat id: {}", request.chat)),
            CommandKind::Status => Ok(self.engine.status().await?.render()),
            CommandKind::Sms => self.list_sms(request.chat).await,
            CommandKind::DeleteSms => self.delete_sms(request.chat, args).await,
            CommandKind::SendSms => self.send_sms(args).await,
            CommandKind::Data => self.set_data(args).await,
            CommandKind::SwitchSim => self.switch_sim(args).await,
            CommandKind::Esim => self.esim(args).await,
        }
    }

    fn help(&self, chat: ChatId) -> String {
        let mut lines = vec!["Modem relay commands".to_string(), String::new()];
        lines.extend(self.table.iter().filter(|c| !c.admin_only).map(Command::help_line));

        if self.is_admin(chat) {
            lines.push(String::new());
            lines.push("Admin commands".to_string());
            lines.extend(self.table.iter().filter(|c| c.admin_only).map(Command::help_line));
        }
        lines.join("\n")
    }

    async fn list_sms(&self, chat: ChatId) -> Result<String> {
        let listing = self.engine.list_sms().await?;
        self.cache.replace(chat, listing.references());
        Ok(listing.render())
    }

    async fn delete_sms(&self, chat: ChatId, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(EngineError::InvalidArgument("usage: /deletesms <id>".to_string()));
        }

        let path = self.cache.resolve(chat, id)?;
        self.engine.delete_sms(&path).await?;
        self.cache.forget(chat, id);
        Ok(format!("Message {} deleted.", id))
    }

    async fn send_sms(&self, args: &str) -> Result<String> {
        let (recipient, text) = args
            .split_once(char::is_whitespace)
            .map(|(r, t)| (r, t.trim()))
            .filter(|(_, t)| !t.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidArgument("usage: /sendsms <number> <text>".to_string())
            })?;

        self.engine.send_sms(recipient, text).await?;
        Ok(format!("SMS sent to {}.", recipient))
    }

    async fn set_data(&self, args: &str) -> Result<String> {
        let enabled = match args.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return Err(EngineError::InvalidArgument("usage: /data on|off".to_string())),
        };

        self.engine.set_data(enabled).await?;
        info!("Mobile data switched {}", args);
        Ok(format!(
            "Mobile data {}.",
            if enabled { "enabled" } else { "disabled" }
        ))
    }

    async fn switch_sim(&self, args: &str) -> Result<String> {
        let slot: u32 = args.parse().map_err(|_| {
            EngineError::InvalidArgument(format!("'{}' is not a slot number", args))
        })?;

        self.engine.switch_sim(slot).await?;
        Ok(format!("Requested switch to SIM slot {}.", slot))
    }

    async fn esim(&self, args: &str) -> Result<String> {
        let esim = self.engine.require_esim()?;
        let subcommand = args.split_whitespace().next().unwrap_or("info");

        match subcommand {
            "info" => {
                let iccid = esim.iccid().await?;
                let mut lines = vec!["eSIM info".to_string(), format!("ICCID: {}", iccid)];

                match esim.esim_enabled().await {
                    Ok(true) => lines.push("eSIM state: enabled".to_string()),
                    Ok(false) => lines.push("eSIM state: disabled or unknown".to_string()),
                    Err(e) => warn!("Failed to query eSIM state: {}", e),
                }
                match esim.eid().await {
                    Ok(eid) => lines.push(format!("EID: {}", eid)),
                    Err(e) => warn!("Failed to query EID: {}", e),
                }
                Ok(lines.join("\n"))
            }
            "power" => Ok(esim.power().await?.to_string()),
            "on" | "off" => {
                esim.set_power(subcommand == "on").await?;
                Ok(format!(
                    "eSIM module {}.",
                    if subcommand == "on" { "enabled" } else { "disabled" }
                ))
            }
            other => Err(EngineError::InvalidArgument(format!(
                "unknown esim subcommand '{}', use info|power|on|off",
                other
            ))),
        }
    }
}
