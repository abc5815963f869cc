//! # modem-relay-core
//!
//! Modem engine abstraction and event pipeline for relaying a cellular modem
//! to a chat service.
//!
//! ## Architecture
//!
//! - **Bus** ([`bus`]): ModemManager access behind the [`ModemBus`] trait,
//!   with a zbus system-bus backend and an in-memory model
//! - **Engines** ([`engine`]): the [`Engine`] trait, the explicit
//!   [`EngineRegistry`] and the ModemManager engine with its optional eSIM
//!   capability
//! - **Serial** ([`serial`]): AT command channel for what the bus lacks
//! - **Listeners** ([`listeners`]): supervised tasks forwarding inbound calls
//!   and SMS to the notification chat
//! - **Commands** ([`commands`]): chat command table and dispatcher
//! - **Cache** ([`sms_cache`]): per-chat short SMS IDs
//!
//! ## Example
//!
//! ```rust,no_run
//! use modem_relay_core::{EngineOptions, EngineRegistry};
//!
//! # async fn example() -> modem_relay_core::Result<()> {
//! let registry = EngineRegistry::with_defaults()?;
//! let mut engine = registry.create("modemmanager", &EngineOptions::default())?;
//! engine.init().await?;
//! println!("{}", engine.status().await?.render());
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod commands;
pub mod engine;
pub mod error;
pub mod listeners;
pub mod serial;
pub mod sms_cache;
pub mod transport;

pub use bus::{MemoryBus, ModemBus, PropValue, SystemBus};
pub use commands::{Command, CommandKind, CommandTable, Dispatcher};
pub use engine::{
    Engine, EngineFactory, EngineOptions, EngineRegistry, EsimCapability, EventSource, ModemPath,
    SerialOptions, SmsEntry, SmsListing, StatusReport,
};
pub use error::{CacheMiss, ChannelError, EngineError, Result};
pub use listeners::{CallListener, Listener, ListenerContext, ListenerSupervisor, SmsListener};
pub use sms_cache::SmsReferenceCache;
pub use transport::{ChatId, ChatTransport, CommandRequest, TransportError};
