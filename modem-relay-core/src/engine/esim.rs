//! eSIM capability over AT commands

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ChannelError;
use crate::serial::{field, AtTransport};
use crate::Result;

const CMD_ICCID: &str = "AT+CCID?";
const CMD_EID: &str = "AT+EID?";
const CMD_SIM_TYPE: &str = "AT+SIMTYPE?";
const CMD_POWER_QUERY: &str = "AT+GTESIMCFG?";
const CMD_POWER_ON: &str = "AT+GTESIMCFG=0,0,0";
const CMD_POWER_OFF: &str = "AT+GTESIMCFG=1,0,0";

/// `+GTESIMCFG` tri-field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EsimPower {
    /// First field is `0` when the eSIM module is enabled
    pub module_enabled: bool,
    pub sku_based: u8,
    pub imsi_based: u8,
}

impl EsimPower {
    /// Parse `a,b,c` from the `+GTESIMCFG:` response value
    pub fn parse(value: &str) -> std::result::Result<Self, ChannelError> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        let [module, sku, imsi] = fields.as_slice() else {
            return Err(ChannelError::Protocol(format!(
                "expected three eSIM config fields, got '{}'",
                value
            )));
        };

        let number = |s: &str| {
            s.parse::<u8>()
                .map_err(|_| ChannelError::Protocol(format!("non-numeric eSIM config field '{}'", s)))
        };

        Ok(Self {
            module_enabled: number(module)? == 0,
            sku_based: number(sku)?,
            imsi_based: number(imsi)?,
        })
    }
}

impl fmt::Display for EsimPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eSIM module {}, SKU_based {}, IMSI_based {}",
            if self.module_enabled { "enabled" } else { "disabled" },
            self.sku_based,
            self.imsi_based
        )
    }
}

/// Engines that can manage an embedded SIM
#[async_trait]
pub trait EsimCapability: Send + Sync {
    /// ICCID of the active profile
    async fn iccid(&self) -> Result<String>;

    /// eUICC identifier
    async fn eid(&self) -> Result<String>;

    /// Whether the modem currently uses the eSIM
    async fn esim_enabled(&self) -> Result<bool>;

    async fn power(&self) -> Result<EsimPower>;

    async fn set_power(&self, enabled: bool) -> Result<()>;
}

/// [`EsimCapability`] backed by an AT transport
pub struct EsimModule {
    transport: Arc<dyn AtTransport>,
}

impl EsimModule {
    pub fn new(transport: Arc<dyn AtTransport>) -> Self {
        Self { transport }
    }

    async fn query(&self, command: &str, prefix: &str) -> Result<String> {
        let response = self.transport.send_command(command).await?;
        let value = field(&response, prefix)?;
        debug!("{} -> {}", command, value);
        Ok(value.to_string())
    }
}

#[async_trait]
impl EsimCapability for EsimModule {
    async fn iccid(&self) -> Result<String> {
        self.query(CMD_ICCID, "+CCID:").await
    }

    async fn eid(&self) -> Result<String> {
        self.query(CMD_EID, "+EID:").await
    }

    async fn esim_enabled(&self) -> Result<bool> {
        Ok(self.query(CMD_SIM_TYPE, "+SIMTYPE:").await? == "1")
    }

    async fn power(&self) -> Result<EsimPower> {
        let value = self.query(CMD_POWER_QUERY, "+GTESIMCFG:").await?;
        Ok(EsimPower::parse(&value)?)
    }

    async fn set_power(&self, enabled: bool) -> Result<()> {
        let command = if enabled { CMD_POWER_ON } else { CMD_POWER_OFF };
        self.transport.send_command(command).await?;
        info!("eSIM module {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

/// AT transport answering the eSIM command set from memory
pub struct SimulatedAt {
    powered: AtomicBool,
}

impl SimulatedAt {
    pub fn new() -> Self {
        Self {
            powered: AtomicBool::new(true),
        }
    }
}

impl Default for SimulatedAt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtTransport for SimulatedAt {
    async fn send_command(&self, command: &str) -> std::result::Result<String, ChannelError> {
        let powered = self.powered.load(Ordering::SeqCst);
        match command {
            CMD_ICCID => Ok("+CCID: 8944500000000000001".to_string()),
            CMD_EID => Ok("+EID: 89049032000000000000000000000001".to_string()),
            CMD_SIM_TYPE => Ok(format!("+SIMTYPE: {}", u8::from(powered))),
            CMD_POWER_QUERY => Ok(format!("+GTESIMCFG: {},0,0", u8::from(!powered))),
            CMD_POWER_ON => {
                self.powered.store(true, Ordering::SeqCst);
                Ok(String::new())
            }
            CMD_POWER_OFF => {
                self.powered.store(false, Ordering::SeqCst);
                Ok(String::new())
            }
            other => Err(ChannelError::CommandFailed {
                command: other.to_string(),
                response: "ERROR".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Transport with canned replies that records commands
    struct Canned {
        replies: HashMap<&'static str, std::result::Result<&'static str, &'static str>>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AtTransport for Canned {
        async fn send_command(&self, command: &str) -> std::result::Result<String, ChannelError> {
            self.sent.lock().unwrap().push(command.to_string());
            match self.replies.get(command) {
                Some(Ok(body)) => Ok(body.to_string()),
                Some(Err(line)) => Err(ChannelError::CommandFailed {
                    command: command.to_string(),
                    response: line.to_string(),
                }),
                None => Err(ChannelError::NoResponse(command.to_string())),
            }
        }
    }

    fn module(replies: Vec<(&'static str, std::result::Result<&'static str, &'static str>)>) -> (EsimModule, Arc<Canned>) {
        let canned = Arc::new(Canned {
            replies: replies.into_iter().collect(),
            sent: Mutex::new(Vec::new()),
        });
        (EsimModule::new(canned.clone()), canned)
    }

    #[test]
    fn test_power_parse() {
        let power = EsimPower::parse("0,1,0").unwrap();
        assert!(power.module_enabled);
        assert_eq!(power.sku_based, 1);
        assert_eq!(power.imsi_based, 0);
        assert!(!EsimPower::parse("1,0,0").unwrap().module_enabled);
        assert!(EsimPower::parse("1,0").is_err());
        assert!(EsimPower::parse("x,0,0").is_err());
    }

    #[tokio::test]
    async fn test_queries_strip_prefixes() {
        let (esim, _) = module(vec![
            (CMD_ICCID, Ok("+CCID: 8944500102198304826")),
            (CMD_EID, Ok("+EID: 89049032004008882600001234567890")),
            (CMD_SIM_TYPE, Ok("+SIMTYPE: 1")),
            (CMD_POWER_QUERY, Ok("+GTESIMCFG: 1,0,0")),
        ]);

        assert_eq!(esim.iccid().await.unwrap(), "8944500102198304826");
        assert_eq!(esim.eid().await.unwrap(), "89049032004008882600001234567890");
        assert!(esim.esim_enabled().await.unwrap());
        assert!(!esim.power().await.unwrap().module_enabled);
    }

    #[tokio::test]
    async fn test_set_power_commands() {
        let (esim, canned) = module(vec![(CMD_POWER_ON, Ok("")), (CMD_POWER_OFF, Ok(""))]);
        esim.set_power(false).await.unwrap();
        esim.set_power(true).await.unwrap();
        assert_eq!(
            *canned.sent.lock().unwrap(),
            vec![CMD_POWER_OFF.to_string(), CMD_POWER_ON.to_string()]
        );
    }

    #[tokio::test]
    async fn test_channel_errors_propagate() {
        let (esim, _) = module(vec![(CMD_EID, Err("+CME ERROR: 4"))]);
        assert!(matches!(
            esim.eid().await,
            Err(EngineError::Channel(ChannelError::CommandFailed { .. }))
        ));
        assert!(matches!(
            esim.iccid().await,
            Err(EngineError::Channel(ChannelError::NoResponse(_)))
        ));
    }

    #[tokio::test]
    async fn test_simulated_power_toggle() {
        let esim = EsimModule::new(Arc::new(SimulatedAt::new()));
        assert!(esim.power().await.unwrap().module_enabled);
        esim.set_power(false).await.unwrap();
        assert!(!esim.power().await.unwrap().module_enabled);
        assert!(!esim.esim_enabled().await.unwrap());
    }
}
