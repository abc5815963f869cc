//! ModemManager Engine
//!
//! Drives a single modem through the ModemManager bus API. The modem is
//! picked once at `init`: the first exported modem (in object-path order)
//! whose state is Registered or Connected.
//!
//! ## Interfaces Used
//!
//! - `Modem`: state, access technologies, signal quality, SIM, bearers, slots
//! - `Modem.Modem3gpp`: registration state
//! - `Modem.Simple`: connection status, connect, disconnect
//! - `Modem.Messaging` / `Sms`: list, create, send, delete
//! - `Modem.Signal`: extended LTE/5G metrics after `Setup`
//! - `Bearer`: IPv4 configuration and traffic statistics

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::esim::{EsimCapability, EsimModule};
use super::status::{
    access_technology, ConnectionInfo, Field, ModemState, RadioMetrics, RegistrationState,
    StatusReport,
};
use super::{short_id, Engine, EventSource, ModemPath, SmsEntry, SmsListing};
use crate::bus::{
    ModemBus, PropValue, BEARER_INTERFACE, MODEM_3GPP_INTERFACE, MODEM_INTERFACE,
    SIGNAL_INTERFACE, SIM_INTERFACE, SMS_INTERFACE,
};
use crate::{EngineError, Result};

const STATE_CONNECTED: i64 = 11;

/// [`Engine`] over ModemManager
pub struct ModemManagerEngine {
    name: String,
    bus: Arc<dyn ModemBus>,
    esim: Option<EsimModule>,
    signal_refresh_secs: u32,
    modem: Option<ModemPath>,
}

impl ModemManagerEngine {
    pub fn new(bus: Arc<dyn ModemBus>, esim: Option<EsimModule>) -> Self {
        Self {
            name: "modemmanager".to_string(),
            bus,
            esim,
            signal_refresh_secs: 5,
            modem: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_signal_refresh(mut self, secs: u32) -> Self {
        self.signal_refresh_secs = secs;
        self
    }

    fn modem_path(&self) -> Result<&str> {
        self.modem
            .as_ref()
            .map(ModemPath::as_str)
            .ok_or(EngineError::NotInitialized)
    }

    async fn discover(&self) -> Result<ModemPath> {
        let objects = self.bus.managed_objects().await?;

        for object in objects.iter().filter(|o| o.has_interface(MODEM_INTERFACE)) {
            let state = object
                .property(MODEM_INTERFACE, "State")
                .and_then(PropValue::as_i64)
                .map(ModemState::from);
            debug!("Modem candidate {} in state {:?}", object.path, state);

            if state.is_some_and(|s| s.is_active()) {
                return Ok(ModemPath::new(object.path.clone()));
            }
        }

        Err(EngineError::NoActiveModem)
    }

    /// Read a property and convert it, treating a type mismatch as a failed read
    async fn read<T>(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        convert: fn(&PropValue) -> Option<T>,
    ) -> Result<T> {
        let value = self.bus.property(path, interface, name).await?;
        convert(&value).ok_or_else(|| {
            EngineError::BusCall(format!("{} on {} has unexpected type: {:?}", name, path, value))
        })
    }

    async fn read_string(&self, path: &str, interface: &str, name: &str) -> Result<String> {
        self.read(path, interface, name, |v| v.as_str().map(String::from))
            .await
    }

    async fn operator(&self, modem: &str) -> Result<Option<String>> {
        let sim = self.read_string(modem, MODEM_INTERFACE, "Sim").await?;
        if sim.is_empty() || sim == "/" {
            debug!("Modem has no active SIM");
            return Ok(None);
        }

        match self.read_string(&sim, SIM_INTERFACE, "OperatorName").await {
            Ok(name) if !name.is_empty() => Ok(Some(name)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!("Could not read operator name from {}: {}", sim, e);
                Ok(None)
            }
        }
    }

    async fn signal_quality(&self, modem: &str) -> Result<u32> {
        self.read(modem, MODEM_INTERFACE, "SignalQuality", |v| {
            let quality = v.as_list()?.first()?.as_u64()?;
            u32::try_from(quality).ok()
        })
        .await
    }

    async fn radio_metrics(&self, modem: &str, technology: &str) -> Option<Field<RadioMetrics>> {
        let property = match technology {
            "LTE" => "Lte",
            "5G" => "Nr5g",
            _ => return None,
        };

        let result = self
            .read(modem, SIGNAL_INTERFACE, property, |v| v.as_dict().cloned())
            .await
            .map(|values| radio_from_dict(&values));
        Some(result.into())
    }

    async fn bearers(&self, modem: &str) -> Result<Vec<String>> {
        self.read(modem, MODEM_INTERFACE, "Bearers", |v| {
            let paths = v.as_list()?;
            Some(paths.iter().filter_map(|p| p.as_str().map(String::from)).collect())
        })
        .await
    }

    /// First bearer with a non-empty IPv4 address
    async fn connection(&self, modem: &str) -> Result<Option<ConnectionInfo>> {
        let bearers = self.bearers(modem).await?;

        for bearer in bearers {
            let address = match self
                .read(&bearer, BEARER_INTERFACE, "Ip4Config", |v| {
                    Some(v.get("address").and_then(PropValue::as_str).unwrap_or("").to_string())
                })
                .await
            {
                Ok(address) if !address.is_empty() => address,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping bearer {}: {}", bearer, e);
                    continue;
                }
            };

            let stats = self
                .read(&bearer, BEARER_INTERFACE, "Stats", |v| v.as_dict().cloned())
                .await
                .unwrap_or_default();
            let counter = |key: &str| stats.get(key).and_then(PropValue::as_u64);

            return Ok(Some(ConnectionInfo {
                duration_secs: counter("duration"),
                rx_bytes: counter("rx-bytes"),
                tx_bytes: counter("tx-bytes"),
                bearer,
                address,
            }));
        }

        Ok(None)
    }

    /// Bearer to tear down: GetStatus `bearer` entry, else the first connected bearer
    async fn active_bearer(
        &self,
        modem: &str,
        status: &BTreeMap<String, PropValue>,
    ) -> Result<String> {
        if let Some(bearer) = status.get("bearer").and_then(PropValue::as_str) {
            if !bearer.is_empty() && bearer != "/" {
                return Ok(bearer.to_string());
            }
        }

        let bearers = self.bearers(modem).await?;

        for bearer in bearers {
            let connected = self
                .read(&bearer, BEARER_INTERFACE, "Connected", PropValue::as_bool)
                .await
                .unwrap_or(false);
            if connected {
                return Ok(bearer);
            }
        }

        Err(EngineError::BusCall(
            "modem reports a connection but no bearer is connected".to_string(),
        ))
    }

    async fn read_sms(&self, path: &str) -> Result<SmsEntry> {
        let sender = self.read_string(path, SMS_INTERFACE, "Number").await?;
        let body = self.read_string(path, SMS_INTERFACE, "Text").await?;
        let timestamp = self
            .read_string(path, SMS_INTERFACE, "Timestamp")
            .await
            .ok()
            .filter(|t| !t.is_empty())
            .map(|t| format_timestamp(&t));
        let reference = self
            .read(path, SMS_INTERFACE, "MessageReference", |v| {
                v.as_u64().and_then(|r| u32::try_from(r).ok())
            })
            .await
            .ok();

        Ok(SmsEntry {
            id: short_id(path).to_string(),
            path: path.to_string(),
            sender,
            body,
            timestamp,
            reference,
            readable: true,
        })
    }
}

fn radio_from_dict(values: &BTreeMap<String, PropValue>) -> RadioMetrics {
    let metric = |key: &str| {
        values
            .get(key)
            .and_then(PropValue::as_f64)
            .filter(|v| v.is_finite())
    };

    RadioMetrics {
        rsrp: metric("rsrp"),
        rsrq: metric("rsrq"),
        snr: metric("snr").or_else(|| metric("sinr")),
    }
}

/// Local `%Y-%m-%d %H:%M`, or the raw text when it does not parse
pub(crate) fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%#z"))
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[async_trait]
impl Engine for ModemManagerEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self) -> Result<()> {
        self.bus
            .connect()
            .await
            .map_err(|e| EngineError::Initialization(e.to_string()))?;

        let modem = self.discover().await?;
        info!("Using modem {}", modem);

        if let Err(e) = self.bus.signal_setup(modem.as_str(), self.signal_refresh_secs).await {
            warn!("Failed to enable extended signal reporting: {}", e);
        }

        self.modem = Some(modem);
        Ok(())
    }

    async fn status(&self) -> Result<StatusReport> {
        let modem = self.modem_path()?;

        let state: Field<ModemState> = self
            .read(modem, MODEM_INTERFACE, "State", PropValue::as_i64)
            .await
            .map(ModemState::from)
            .into();
        let registration: Field<RegistrationState> = self
            .read(modem, MODEM_3GPP_INTERFACE, "RegistrationState", PropValue::as_u64)
            .await
            .map(RegistrationState::from)
            .into();
        let technology: Field<String> = self
            .read(modem, MODEM_INTERFACE, "AccessTechnologies", PropValue::as_u64)
            .await
            .map(|bits| access_technology(bits).to_string())
            .into();

        let radio = match technology.value() {
            Some(tech) => self.radio_metrics(modem, tech).await,
            None => None,
        };

        Ok(StatusReport {
            state,
            registration,
            access_technology: technology,
            operator: self.operator(modem).await.into(),
            signal_quality: self.signal_quality(modem).await.into(),
            radio,
            connection: self.connection(modem).await.into(),
        })
    }

    async fn list_sms(&self) -> Result<SmsListing> {
        let modem = self.modem_path()?;
        let paths = self.bus.messaging_list(modem).await?;
        debug!("Modem stores {} messages", paths.len());

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read_sms(&path).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Could not read message {}: {}", path, e);
                    entries.push(SmsEntry {
                        id: short_id(&path).to_string(),
                        sender: "unknown".to_string(),
                        body: format!("<unreadable: {}>", e),
                        timestamp: None,
                        reference: None,
                        readable: false,
                        path,
                    });
                }
            }
        }

        Ok(SmsListing { entries })
    }

    async fn send_sms(&self, recipient: &str, body: &str) -> Result<()> {
        let modem = self.modem_path()?;
        if recipient.trim().is_empty() {
            return Err(EngineError::InvalidArgument("recipient is empty".to_string()));
        }
        if body.is_empty() {
            return Err(EngineError::InvalidArgument("message text is empty".to_string()));
        }

        let sms = self.bus.messaging_create(modem, recipient, body).await?;
        debug!("Created outgoing message {}", sms);

        self.bus.sms_send(&sms).await.map_err(|e| {
            EngineError::BusCall(format!("send failed, message left at {}: {}", sms, e))
        })?;

        info!("Sent SMS to {}", recipient);
        Ok(())
    }

    async fn delete_sms(&self, path: &str) -> Result<()> {
        let modem = self.modem_path()?;
        self.bus.messaging_delete(modem, path).await?;
        info!("Deleted SMS {}", path);
        Ok(())
    }

    async fn switch_sim(&self, slot: u32) -> Result<()> {
        let modem = self.modem_path()?;
        self.bus.set_current_slots(modem, slot).await?;
        info!("Switched to SIM slot {}", slot);
        Ok(())
    }

    async fn set_data(&self, enabled: bool) -> Result<()> {
        let modem = self.modem_path()?;
        let status = self.bus.simple_status(modem).await?;
        let connected = status.get("state").and_then(PropValue::as_i64) == Some(STATE_CONNECTED);

        match (enabled, connected) {
            (true, false) => {
                let bearer = self.bus.simple_connect(modem).await?;
                info!("Data connection up on {}", bearer);
            }
            (false, true) => {
                let bearer = self.active_bearer(modem, &status).await?;
                self.bus.simple_disconnect(modem, &bearer).await?;
                info!("Data connection down on {}", bearer);
            }
            _ => debug!("Data connection already {}", if enabled { "up" } else { "down" }),
        }
        Ok(())
    }

    fn modem(&self) -> Option<&ModemPath> {
        self.modem.as_ref()
    }

    fn event_source(&self) -> Option<EventSource> {
        self.modem.as_ref().map(|modem| EventSource {
            bus: Arc::clone(&self.bus),
            modem: modem.clone(),
        })
    }

    fn esim(&self) -> Option<&dyn EsimCapability> {
        self.esim.as_ref().map(|e| e as &dyn EsimCapability)
    }
}
