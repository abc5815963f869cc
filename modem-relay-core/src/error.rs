//! Error handling for the modem engine
//!
//! A single error type covers every engine, listener and command operation.
//! Bus and serial failures convert automatically through `From`.
//!
//! ## Error Categories
//!
//! ### Initialization
//! Connecting to the management bus or discovering a usable modem failed.
//! These are fatal at startup; nothing retries them.
//!
//! ### Bus Calls
//! Any failed method call or property read on the management service.
//! Automatically converted from `zbus::Error` and `zbus::fdo::Error`.
//!
//! ### Serial Channel
//! AT command failures from the fallback serial endpoint, see [`ChannelError`].
//!
//! ### Cache Misses
//! A short SMS ID that the requesting chat has not listed, see [`CacheMiss`].

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from the serial AT command channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The serial device could not be opened
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    /// Read or write failure on an open port
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Neither `OK` nor `ERROR` arrived before the read deadline
    #[error("No response to '{0}' before timeout")]
    NoResponse(String),

    /// The modem answered with an `ERROR` line
    #[error("Command '{command}' failed: {response}")]
    CommandFailed { command: String, response: String },

    /// The response did not carry the expected prefix or fields
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

/// Why a short SMS ID could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    /// The chat never listed messages, or its listing was empty
    #[error("no messages listed for this chat")]
    Empty,

    /// The chat listed messages but not this ID
    #[error("unknown message id '{0}'")]
    UnknownId(String),
}

/// Errors that can occur in engine, listener and command operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine setup failed (bus connection, configuration)
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// No modem is registered or connected
    #[error("No registered or connected modem found")]
    NoActiveModem,

    /// The engine was used before `init` succeeded
    #[error("Engine not initialized")]
    NotInitialized,

    /// Management bus method call or property read failed
    #[error("Bus call failed: {0}")]
    BusCall(String),

    /// Serial AT channel failure
    #[error("Serial channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The engine does not expose the requested capability
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Short SMS ID lookup failed
    #[error("Cache miss: {0}")]
    CacheMiss(#[from] CacheMiss),

    /// A bus signal did not carry the expected arguments
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Command argument was missing or unparsable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No engine factory registered under this name
    #[error("Unknown engine '{name}' (available: {available})")]
    UnknownEngine { name: String, available: String },

    /// Registry rejected a factory
    #[error("Registry error: {0}")]
    Registry(String),

    /// The chat transport could not deliver a message
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<zbus::Error> for EngineError {
    fn from(error: zbus::Error) -> Self {
        EngineError::BusCall(error.to_string())
    }
}

impl From<zbus::fdo::Error> for EngineError {
    fn from(error: zbus::fdo::Error) -> Self {
        EngineError::BusCall(error.to_string())
    }
}

impl From<zbus::zvariant::Error> for EngineError {
    fn from(error: zbus::zvariant::Error) -> Self {
        EngineError::BusCall(format!("decode: {}", error))
    }
}

impl EngineError {
    /// Check if this error prevents the daemon from starting
    ///
    /// ```rust
    /// use modem_relay_core::EngineError;
    ///
    /// assert!(EngineError::NoActiveModem.is_fatal());
    /// assert!(!EngineError::BusCall("timeout".to_string()).is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Initialization(_)
                | EngineError::NoActiveModem
                | EngineError::UnknownEngine { .. }
                | EngineError::Registry(_)
        )
    }

    /// Check if the operator can fix this by changing the command
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            EngineError::CacheMiss(_)
                | EngineError::InvalidArgument(_)
                | EngineError::CapabilityUnavailable(_)
        )
    }

    /// Get a short message suitable for a chat reply
    ///
    /// ```rust
    /// use modem_relay_core::{CacheMiss, EngineError};
    ///
    /// let error = EngineError::CacheMiss(CacheMiss::Empty);
    /// assert_eq!(
    ///     error.user_message(),
    ///     "No messages listed yet. Run /sms first."
    /// );
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NoActiveModem => {
                "No active modem. Check that the modem is registered.".to_string()
            }
            EngineError::NotInitialized => "Modem engine is not ready yet.".to_string(),
            EngineError::CacheMiss(CacheMiss::Empty) => {
                "No messages listed yet. Run /sms first.".to_string()
            }
            EngineError::CacheMiss(CacheMiss::UnknownId(id)) => {
                format!("Unknown message id '{}'. Run /sms to refresh.", id)
            }
            EngineError::CapabilityUnavailable(what) => {
                format!("{} is not supported by this modem engine.", what)
            }
            EngineError::InvalidArgument(msg) => format!("Invalid argument: {}", msg),
            EngineError::Channel(ChannelError::NoResponse(cmd)) => {
                format!("The modem did not answer '{}' in time.", cmd)
            }
            EngineError::Channel(e) => format!("Serial error: {}", e),
            EngineError::BusCall(msg) => format!("Modem request failed: {}", msg),
            other => other.to_string(),
        }
    }
}
