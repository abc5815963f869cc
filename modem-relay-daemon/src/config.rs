//! Daemon Configuration
//!
//! TOML configuration for the modem relay daemon, stored at
//! `$XDG_CONFIG_HOME/modem-relay/daemon.toml` unless `--config` points
//! elsewhere. A missing file is created with defaults.
//!
//! `ADMIN_CHAT_ID` and `AT_PORT` in the environment override the file.

use anyhow::{Context, Result};
use modem_relay_core::{ChatId, EngineOptions, SerialOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "daemon.toml";

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub listeners: ListenerConfig,
}

/// Engine selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Registry name of the engine to run
    #[serde(default = "default_engine")]
    pub name: String,

    /// Extended signal refresh rate requested from the modem, in seconds
    #[serde(default = "default_signal_refresh")]
    pub signal_refresh_secs: u32,
}

/// AT command port used for eSIM management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read deadline per command
    #[serde(default = "default_serial_timeout")]
    pub timeout_secs: u64,
}

/// Where replies and notifications go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifySink {
    /// Print to stdout
    #[default]
    Console,
    /// Desktop notification on the session bus
    Desktop,
}

/// Chat side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chat allowed to run admin commands and receiving event notifications
    #[serde(default)]
    pub admin_chat_id: i64,

    /// Sink for call and SMS notifications
    #[serde(default)]
    pub notify: NotifySink,
}

/// Listener toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_true")]
    pub enable_calls: bool,

    #[serde(default = "default_true")]
    pub enable_sms: bool,

    /// Remove forwarded messages from the modem once delivered
    #[serde(default = "default_true")]
    pub delete_after_forward: bool,
}

fn default_engine() -> String {
    "modemmanager".to_string()
}

fn default_signal_refresh() -> u32 {
    5
}

fn default_port() -> String {
    modem_relay_core::serial::DEFAULT_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    modem_relay_core::serial::DEFAULT_BAUD_RATE
}

fn default_serial_timeout() -> u64 {
    modem_relay_core::serial::DEFAULT_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine(),
            signal_refresh_secs: default_signal_refresh(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_secs: default_serial_timeout(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            admin_chat_id: 0,
            notify: NotifySink::Console,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enable_calls: true,
            enable_sms: true,
            delete_after_forward: true,
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("modem-relay")
            .join(CONFIG_FILE)
    }

    /// Load configuration from `path` (or the default path), creating it if not found
    ///
    /// Environment overrides are applied after reading the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let config = Config::default();
            config.save(&path)?;
            tracing::info!("Created default configuration at {}", path.display());
            config
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `ADMIN_CHAT_ID` and `AT_PORT`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(id) = lookup("ADMIN_CHAT_ID") {
            self.chat.admin_chat_id = id
                .trim()
                .parse()
                .with_context(|| format!("ADMIN_CHAT_ID '{}' is not a chat id", id))?;
        }
        if let Some(port) = lookup("AT_PORT").filter(|p| !p.is_empty()) {
            self.serial.port = port;
        }
        Ok(())
    }

    pub fn admin_chat(&self) -> ChatId {
        ChatId(self.chat.admin_chat_id)
    }

    /// Options handed to the engine factory
    pub fn engine_options(&self) -> EngineOptions {
        let serial = self.serial.enabled.then(|| SerialOptions {
            port: self.serial.port.clone(),
            baud_rate: self.serial.baud_rate,
            timeout: Duration::from_secs(self.serial.timeout_secs),
        });

        EngineOptions {
            serial,
            signal_refresh_secs: self.engine.signal_refresh_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.name, "modemmanager");
        assert_eq!(config.engine.signal_refresh_secs, 5);
        assert_eq!(config.serial.port, "/dev/wwan0at0");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.timeout_secs, 5);
        assert_eq!(config.chat.notify, NotifySink::Console);
        assert!(config.listeners.delete_after_forward);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.serial.port, config.serial.port);
        assert_eq!(parsed.chat.admin_chat_id, config.chat.admin_chat_id);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chat]
            admin_chat_id = 123456
            notify = "desktop"

            [serial]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.admin_chat(), ChatId(123456));
        assert_eq!(config.chat.notify, NotifySink::Desktop);
        assert!(!config.serial.enabled);
        assert_eq!(config.serial.baud_rate, 115200);
        assert!(config.listeners.enable_calls);
        assert!(config.engine_options().serial.is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.engine.name, "modemmanager");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.engine.name = "simulated".to_string();
        config.listeners.delete_after_forward = false;
        config.save(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let loaded: Config = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.engine.name, "simulated");
        assert!(!loaded.listeners.delete_after_forward);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "ADMIN_CHAT_ID" => Some(" -100200 ".to_string()),
                "AT_PORT" => Some("/dev/ttyUSB2".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.admin_chat(), ChatId(-100200));
        assert_eq!(config.serial.port, "/dev/ttyUSB2");
        assert_eq!(
            config.engine_options().serial.unwrap().port,
            "/dev/ttyUSB2"
        );
    }

    #[test]
    fn test_invalid_admin_chat_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "ADMIN_CHAT_ID").then(|| "admin".to_string()));
        assert!(result.is_err());
    }
}
