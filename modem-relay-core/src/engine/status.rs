//! Modem status model
//!
//! Decodes ModemManager's numeric enums and assembles the composite status
//! report. Every line of the report is read independently; one failed read
//! renders that line as "unavailable" without failing the whole report.

use serde::Serialize;
use std::fmt;

/// `MMModemState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemState {
    Failed,
    Unknown,
    Initializing,
    Locked,
    Disabled,
    Disabling,
    Enabling,
    Enabled,
    Searching,
    Registered,
    Disconnecting,
    Connecting,
    Connected,
}

impl From<i64> for ModemState {
    fn from(value: i64) -> Self {
        match value {
            -1 => ModemState::Failed,
            1 => ModemState::Initializing,
            2 => ModemState::Locked,
            3 => ModemState::Disabled,
            4 => ModemState::Disabling,
            5 => ModemState::Enabling,
            6 => ModemState::Enabled,
            7 => ModemState::Searching,
            8 => ModemState::Registered,
            9 => ModemState::Disconnecting,
            10 => ModemState::Connecting,
            11 => ModemState::Connected,
            _ => ModemState::Unknown,
        }
    }
}

impl ModemState {
    /// Registered or connected modems are usable
    pub fn is_active(&self) -> bool {
        matches!(self, ModemState::Registered | ModemState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModemState::Failed => "Failed",
            ModemState::Unknown => "Unknown",
            ModemState::Initializing => "Initializing",
            ModemState::Locked => "Locked",
            ModemState::Disabled => "Disabled",
            ModemState::Disabling => "Disabling",
            ModemState::Enabling => "Enabling",
            ModemState::Enabled => "Enabled",
            ModemState::Searching => "Searching",
            ModemState::Registered => "Registered",
            ModemState::Disconnecting => "Disconnecting",
            ModemState::Connecting => "Connecting",
            ModemState::Connected => "Connected",
        }
    }
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `MMModem3gppRegistrationState`, first six values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Idle,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl From<u64> for RegistrationState {
    fn from(value: u64) -> Self {
        match value {
            0 => RegistrationState::Idle,
            1 => RegistrationState::Home,
            2 => RegistrationState::Searching,
            3 => RegistrationState::Denied,
            5 => RegistrationState::Roaming,
            _ => RegistrationState::Unknown,
        }
    }
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Idle => "Idle",
            RegistrationState::Home => "Home",
            RegistrationState::Searching => "Searching",
            RegistrationState::Denied => "Denied",
            RegistrationState::Unknown => "Unknown",
            RegistrationState::Roaming => "Roaming",
        }
    }
}

/// Access technology bits in priority order
const ACCESS_TECHNOLOGIES: &[(u64, &str)] = &[
    (1 << 15, "5G"),
    (1 << 14, "LTE"),
    (1 << 9, "HSPA+"),
    (1 << 7, "HSUPA"),
    (1 << 6, "HSDPA"),
    (1 << 5, "UMTS"),
    (1 << 4, "EDGE"),
];

/// Highest-priority technology in an `MMModemAccessTechnology` mask
///
/// ```rust
/// use modem_relay_core::engine::access_technology;
///
/// assert_eq!(access_technology(16384 | 32), "LTE");
/// assert_eq!(access_technology(0), "unknown");
/// ```
pub fn access_technology(bits: u64) -> &'static str {
    ACCESS_TECHNOLOGIES
        .iter()
        .find(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

/// Human-readable elapsed time
///
/// Zero units are omitted; seconds are shown when nothing else is.
///
/// ```rust
/// use modem_relay_core::engine::format_duration;
///
/// assert_eq!(format_duration(0), "0s");
/// assert_eq!(format_duration(90), "1m 30s");
/// assert_eq!(format_duration(86401), "1d 1s");
/// assert_eq!(format_duration(86461), "1d 1m 1s");
/// ```
pub fn format_duration(secs: u64) -> String {
    let units = [
        (secs / 86_400, "d"),
        ((secs % 86_400) / 3_600, "h"),
        ((secs % 3_600) / 60, "m"),
        (secs % 60, "s"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect();

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One report line: a value or the reason it could not be read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
    Value(T),
    Unavailable(String),
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            Field::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Field::Value(_))
    }

    fn render_with(&self, f: impl FnOnce(&T) -> String) -> String {
        match self {
            Field::Value(v) => f(v),
            Field::Unavailable(_) => "unavailable".to_string(),
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for Field<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Field::Value(v),
            Err(e) => Field::Unavailable(e.to_string()),
        }
    }
}

/// Extended LTE/5G radio metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RadioMetrics {
    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
    pub snr: Option<f64>,
}

impl RadioMetrics {
    pub fn is_empty(&self) -> bool {
        self.rsrp.is_none() && self.rsrq.is_none() && self.snr.is_none()
    }
}

/// The active data connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub bearer: String,
    pub address: String,
    pub duration_secs: Option<u64>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
}

/// Composite modem status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: Field<ModemState>,
    pub registration: Field<RegistrationState>,
    pub access_technology: Field<String>,
    /// `None` when the SIM reports no operator
    pub operator: Field<Option<String>>,
    pub signal_quality: Field<u32>,
    /// Present only on LTE and 5G
    pub radio: Option<Field<RadioMetrics>>,
    /// `None` when no bearer carries an IPv4 address
    pub connection: Field<Option<ConnectionInfo>>,
}

impl StatusReport {
    /// Chat-ready multi-line text
    pub fn render(&self) -> String {
        let mut lines = vec!["Modem state".to_string()];
        lines.push(format!("State: {}", self.state.render_with(|s| s.to_string())));
        lines.push(format!(
            "Registration: {}",
            self.registration.render_with(|r| r.as_str().to_string())
        ));
        lines.push(format!(
            "Technology: {}",
            self.access_technology.render_with(String::clone)
        ));
        if !matches!(self.operator, Field::Value(None)) {
            lines.push(format!(
                "Operator: {}",
                self.operator
                    .render_with(|o| o.clone().unwrap_or_default())
            ));
        }

        lines.push(String::new());
        lines.push("Signal".to_string());
        lines.push(format!(
            "Quality: {}",
            self.signal_quality.render_with(|q| format!("{}%", q))
        ));
        match &self.radio {
            Some(Field::Value(metrics)) => {
                if let Some(rsrp) = metrics.rsrp {
                    lines.push(format!("RSRP: {:.1} dBm", rsrp));
                }
                if let Some(rsrq) = metrics.rsrq {
                    lines.push(format!("RSRQ: {:.1} dB", rsrq));
                }
                if let Some(snr) = metrics.snr {
                    lines.push(format!("SNR: {:.1} dB", snr));
                }
            }
            Some(Field::Unavailable(_)) => lines.push("Radio metrics: unavailable".to_string()),
            None => {}
        }

        lines.push(String::new());
        lines.push("Data connection".to_string());
        match &self.connection {
            Field::Value(Some(info)) => {
                lines.push(format!("IPv4 address: {}", info.address));
                if let Some(secs) = info.duration_secs {
                    lines.push(format!("Online: {}", format_duration(secs)));
                }
                if let (Some(rx), Some(tx)) = (info.rx_bytes, info.tx_bytes) {
                    lines.push(format!(
                        "Traffic: {} down / {} up",
                        format_bytes(rx),
                        format_bytes(tx)
                    ));
                }
            }
            Field::Value(None) => lines.push("Status: not connected".to_string()),
            Field::Unavailable(_) => lines.push("Status: unavailable".to_string()),
        }

        lines.join("\n")
    }
}
