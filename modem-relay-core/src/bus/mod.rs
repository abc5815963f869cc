//! Management Bus Access
//!
//! Everything the engine and the listeners need from ModemManager goes through
//! the [`ModemBus`] trait: object enumeration, property reads, the handful of
//! method calls the engine issues, and signal subscription.
//!
//! ## ModemManager DBus Interface
//!
//! - Service: `org.freedesktop.ModemManager1`
//! - Object: `/org/freedesktop/ModemManager1`
//! - Enumeration: `org.freedesktop.DBus.ObjectManager.GetManagedObjects`
//!
//! [`SystemBus`] talks to the real system bus through zbus. [`MemoryBus`] is an
//! in-memory model of the same service used by the simulated engine and tests.

mod memory;
mod system;

pub use memory::{BusCall, MemoryBus};
pub use system::SystemBus;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::Result;

/// ModemManager well-known bus name
pub const MM_SERVICE: &str = "org.freedesktop.ModemManager1";
/// ModemManager root object
pub const MM_PATH: &str = "/org/freedesktop/ModemManager1";

pub const MODEM_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem";
pub const MODEM_3GPP_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Modem3gpp";
pub const SIMPLE_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Simple";
pub const MESSAGING_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Messaging";
pub const VOICE_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Voice";
pub const SIGNAL_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Signal";
pub const SIM_INTERFACE: &str = "org.freedesktop.ModemManager1.Sim";
pub const SMS_INTERFACE: &str = "org.freedesktop.ModemManager1.Sms";
pub const CALL_INTERFACE: &str = "org.freedesktop.ModemManager1.Call";
pub const BEARER_INTERFACE: &str = "org.freedesktop.ModemManager1.Bearer";

/// `MMCallDirection` values
pub const CALL_DIRECTION_INCOMING: u32 = 1;
pub const CALL_DIRECTION_OUTGOING: u32 = 2;

/// Queue depth of every signal subscription
pub const SIGNAL_QUEUE_CAPACITY: usize = 10;

/// Decoded bus value
///
/// A plain-data mirror of the DBus variant types ModemManager actually uses,
/// so engine code never handles zvariant lifetimes.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Path(String),
    List(Vec<PropValue>),
    Dict(BTreeMap<String, PropValue>),
    /// A type the decoder does not map; carries the signature for logging
    Unsupported(String),
}

impl PropValue {
    /// Any integer variant widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::I32(v) => Some(i64::from(*v)),
            PropValue::U32(v) => Some(i64::from(*v)),
            PropValue::I64(v) => Some(*v),
            PropValue::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Any non-negative integer variant widened to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropValue::U32(v) => Some(u64::from(*v)),
            PropValue::U64(v) => Some(*v),
            PropValue::I32(v) => u64::try_from(*v).ok(),
            PropValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String or object path contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) | PropValue::Path(s) => Some(s),
            _ => None,
        }
    }

    /// Object path contents only
    pub fn as_path(&self) -> Option<&str> {
        match self {
            PropValue::Path(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            PropValue::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is a dictionary
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.as_dict().and_then(|map| map.get(key))
    }

    /// Build a dictionary from key/value pairs
    pub fn dict<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, PropValue)>,
        K: Into<String>,
    {
        PropValue::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::I32(value)
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        PropValue::U32(value)
    }
}

impl From<u64> for PropValue {
    fn from(value: u64) -> Self {
        PropValue::U64(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::F64(value)
    }
}

/// One entry of `GetManagedObjects`
#[derive(Debug, Clone, Default)]
pub struct ManagedObject {
    pub path: String,
    /// Interface name to its property map
    pub interfaces: BTreeMap<String, BTreeMap<String, PropValue>>,
}

impl ManagedObject {
    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.contains_key(interface)
    }

    pub fn property(&self, interface: &str, name: &str) -> Option<&PropValue> {
        self.interfaces.get(interface).and_then(|props| props.get(name))
    }
}

/// A signal delivered to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct BusSignal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<PropValue>,
}

impl BusSignal {
    /// First argument if it is an object path
    pub fn object_path(&self) -> Option<&str> {
        self.args.first().and_then(PropValue::as_path)
    }
}

/// Access to the modem management service
///
/// Each method maps to exactly one bus round trip. No call carries a timeout
/// of its own; the bus library's defaults apply.
#[async_trait]
pub trait ModemBus: Send + Sync {
    /// Connect eagerly; later calls reuse the connection
    async fn connect(&self) -> Result<()>;

    /// Enumerate every object exported by the service, sorted by path
    async fn managed_objects(&self) -> Result<Vec<ManagedObject>>;

    /// Read one property
    async fn property(&self, path: &str, interface: &str, name: &str) -> Result<PropValue>;

    /// `Modem.Simple.GetStatus`
    async fn simple_status(&self, modem: &str) -> Result<BTreeMap<String, PropValue>>;

    /// `Modem.Simple.Connect` with empty properties; returns the bearer path
    async fn simple_connect(&self, modem: &str) -> Result<String>;

    /// `Modem.Simple.Disconnect`
    async fn simple_disconnect(&self, modem: &str, bearer: &str) -> Result<()>;

    /// `Modem.Messaging.List`
    async fn messaging_list(&self, modem: &str) -> Result<Vec<String>>;

    /// `Modem.Messaging.Create`; returns the new message path
    async fn messaging_create(&self, modem: &str, number: &str, text: &str) -> Result<String>;

    /// `Modem.Messaging.Delete`
    async fn messaging_delete(&self, modem: &str, sms: &str) -> Result<()>;

    /// `Sms.Send`
    async fn sms_send(&self, sms: &str) -> Result<()>;

    /// `Modem.SetCurrentSlots` with a single slot
    async fn set_current_slots(&self, modem: &str, slot: u32) -> Result<()>;

    /// `Modem.Signal.Setup`
    async fn signal_setup(&self, modem: &str, rate_secs: u32) -> Result<()>;

    /// Subscribe to every signal of `interface` emitted by `path`
    ///
    /// The returned queue holds [`SIGNAL_QUEUE_CAPACITY`] signals. A full queue
    /// is logged as a warning and then applies backpressure.
    async fn subscribe(&self, path: &str, interface: &str) -> Result<mpsc::Receiver<BusSignal>>;
}
