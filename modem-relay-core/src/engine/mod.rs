//! Modem Engines
//!
//! An [`Engine`] normalizes one modem-control backend behind a fixed set of
//! operations. Engines are created by name through an explicitly constructed
//! [`EngineRegistry`]; each registered [`EngineFactory`] produces a fresh,
//! uninitialized engine.
//!
//! ## Lifecycle
//!
//! 1. `EngineRegistry::create` builds the engine
//! 2. `Engine::init` connects and discovers the modem (fatal on failure)
//! 3. The engine is shared for the rest of the process
//!
//! Optional capabilities are queried, never inferred from the concrete type:
//! `engine.esim()` is `Some` only when the engine can reach an AT port.

mod esim;
mod modem_manager;
mod status;

pub use esim::{EsimCapability, EsimModule, EsimPower, SimulatedAt};
pub use modem_manager::ModemManagerEngine;
pub(crate) use modem_manager::format_timestamp;
pub use status::{
    access_technology, format_duration, ConnectionInfo, Field, ModemState, RadioMetrics,
    RegistrationState, StatusReport,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bus::{MemoryBus, ModemBus, SystemBus};
use crate::serial::{AtTransport, SerialChannel, DEFAULT_BAUD_RATE, DEFAULT_PORT, DEFAULT_TIMEOUT};
use crate::{EngineError, Result};

/// Object path of the selected modem
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModemPath(String);

impl ModemPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bus handle and modem the listeners subscribe to
#[derive(Clone)]
pub struct EventSource {
    pub bus: Arc<dyn ModemBus>,
    pub modem: ModemPath,
}

/// One stored message as listed by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct SmsEntry {
    /// Final segment of the object path
    pub id: String,
    pub path: String,
    pub sender: String,
    pub body: String,
    /// Already formatted for display
    pub timestamp: Option<String>,
    pub reference: Option<u32>,
    /// False when the message properties could not be read
    pub readable: bool,
}

impl SmsEntry {
    pub fn render(&self) -> String {
        let mut text = format!("[{}] From: {}", self.id, self.sender);
        if let Some(ts) = &self.timestamp {
            text.push_str(&format!("\nTime: {}", ts));
        }
        text.push_str(&format!("\n{}", self.body));
        text
    }
}

/// Ordered result of `list_sms`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmsListing {
    pub entries: Vec<SmsEntry>,
}

impl SmsListing {
    /// Short ID to object path, for the reference cache
    pub fn references(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.id.clone(), e.path.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "No messages stored on the modem.".to_string();
        }
        let blocks: Vec<String> = self.entries.iter().map(SmsEntry::render).collect();
        format!(
            "{} message(s):\n\n{}\n\nDelete with /deletesms <id>",
            self.entries.len(),
            blocks.join("\n\n")
        )
    }
}

/// Short ID of a message object path
pub fn short_id(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// A modem-control backend
#[async_trait]
pub trait Engine: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Connect and discover the modem; no retry
    async fn init(&mut self) -> Result<()>;

    async fn status(&self) -> Result<StatusReport>;

    async fn list_sms(&self) -> Result<SmsListing>;

    async fn send_sms(&self, recipient: &str, body: &str) -> Result<()>;

    /// Delete by object path
    async fn delete_sms(&self, path: &str) -> Result<()>;

    async fn switch_sim(&self, slot: u32) -> Result<()>;

    /// Bring the data connection up or down; no-op when already there
    async fn set_data(&self, enabled: bool) -> Result<()>;

    /// The modem selected by `init`
    fn modem(&self) -> Option<&ModemPath>;

    /// Signal source for the listeners, if the backend has one
    fn event_source(&self) -> Option<EventSource> {
        None
    }

    /// eSIM management, if the backend supports it
    fn esim(&self) -> Option<&dyn EsimCapability> {
        None
    }

    fn require_esim(&self) -> Result<&dyn EsimCapability> {
        self.esim()
            .ok_or_else(|| EngineError::CapabilityUnavailable("eSIM management".to_string()))
    }
}

/// Serial endpoint settings
#[derive(Debug, Clone)]
pub struct SerialOptions {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Settings passed to every factory
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// `None` disables the eSIM capability
    pub serial: Option<SerialOptions>,
    /// Extended signal refresh rate requested from the modem
    pub signal_refresh_secs: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            serial: Some(SerialOptions::default()),
            signal_refresh_secs: 5,
        }
    }
}

impl EngineOptions {
    fn esim_module(&self) -> Option<EsimModule> {
        self.serial.as_ref().map(|serial| {
            let channel: Arc<dyn AtTransport> = Arc::new(SerialChannel::new(
                serial.port.clone(),
                serial.baud_rate,
                serial.timeout,
            ));
            EsimModule::new(channel)
        })
    }
}

/// Produces engines of one kind
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn create(&self, options: &EngineOptions) -> Box<dyn Engine>;
}

/// ModemManager on the system bus
pub struct ModemManagerFactory;

impl EngineFactory for ModemManagerFactory {
    fn name(&self) -> &str {
        "modemmanager"
    }

    fn description(&self) -> &str {
        "ModemManager over DBus, eSIM over the AT port"
    }

    fn create(&self, options: &EngineOptions) -> Box<dyn Engine> {
        Box::new(
            ModemManagerEngine::new(Arc::new(SystemBus::new()), options.esim_module())
                .with_signal_refresh(options.signal_refresh_secs),
        )
    }
}

/// In-memory modem for running without hardware
///
/// Engines share the factory's bus, so the caller can inject inbound events.
pub struct SimulatedFactory {
    bus: Arc<MemoryBus>,
}

impl SimulatedFactory {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self { bus }
    }
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBus::simulated()))
    }
}

impl EngineFactory for SimulatedFactory {
    fn name(&self) -> &str {
        "simulated"
    }

    fn description(&self) -> &str {
        "In-memory modem with canned data"
    }

    fn create(&self, options: &EngineOptions) -> Box<dyn Engine> {
        let bus: Arc<dyn ModemBus> = self.bus.clone();
        let esim = EsimModule::new(Arc::new(SimulatedAt::new()));
        Box::new(
            ModemManagerEngine::new(bus, Some(esim))
                .with_name("simulated")
                .with_signal_refresh(options.signal_refresh_secs),
        )
    }
}

/// Name to factory table, built at startup
#[derive(Default)]
pub struct EngineRegistry {
    factories: BTreeMap<String, Arc<dyn EngineFactory>>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in engines
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(ModemManagerFactory))?;
        registry.register(Arc::new(SimulatedFactory::default()))?;
        Ok(registry)
    }

    /// Add a factory
    ///
    /// # Errors
    ///
    /// Returns error if a factory with the same name is already registered.
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) -> Result<()> {
        let name = factory.name().to_string();
        if self.factories.contains_key(&name) {
            return Err(EngineError::Registry(format!(
                "Engine factory '{}' is already registered",
                name
            )));
        }

        info!("Registered engine factory: {}", name);
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.factories
            .values()
            .map(|f| (f.name(), f.description()))
            .collect()
    }

    /// Build a fresh, uninitialized engine
    pub fn create(&self, name: &str, options: &EngineOptions) -> Result<Box<dyn Engine>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EngineError::UnknownEngine {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        info!("Creating engine '{}'", name);
        Ok(factory.create(options))
    }
}
