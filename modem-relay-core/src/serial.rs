//! Serial AT Command Channel
//!
//! Capabilities ModemManager does not expose (eSIM profile state, EID) are
//! reached through the modem's AT port. Every command opens the device, writes
//! `command\r\n` and collects response lines until a terminator:
//!
//! - `OK` ends a successful response
//! - any line containing `ERROR` fails the command
//! - no terminator before the deadline is [`ChannelError::NoResponse`]
//!
//! Empty lines and the echoed command are not part of the response body.

use async_trait::async_trait;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ChannelError;

/// Default AT port of WWAN modules
pub const DEFAULT_PORT: &str = "/dev/wwan0at0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Read deadline for one command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read wait of the underlying port; the deadline is enforced above it
const READ_POLL: Duration = Duration::from_millis(200);
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Anything that can execute one AT command and return its response body
#[async_trait]
pub trait AtTransport: Send + Sync {
    async fn send_command(&self, command: &str) -> Result<String, ChannelError>;
}

/// AT transport over a serial device
pub struct SerialChannel {
    port: String,
    baud_rate: u32,
    timeout: Duration,
    /// Serializes commands so responses never interleave
    lock: Mutex<()>,
}

impl SerialChannel {
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
            lock: Mutex::new(()),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    fn open(port: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>, ChannelError> {
        let builder = serialport::new(port, baud_rate).timeout(READ_POLL);

        #[cfg(unix)]
        let builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);

        builder.open().map_err(|e| ChannelError::Open {
            port: port.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl AtTransport for SerialChannel {
    async fn send_command(&self, command: &str) -> Result<String, ChannelError> {
        let _guard = self.lock.lock().await;

        let port = self.port.clone();
        let baud_rate = self.baud_rate;
        let timeout = self.timeout;
        let command = command.to_string();
        debug!("AT {} -> {}", port, command);

        tokio::task::spawn_blocking(move || {
            let mut device = Self::open(&port, baud_rate)?;
            let result = exchange(&mut *device, &command, timeout);
            if let Err(ref e) = result {
                warn!("AT command '{}' on {} failed: {}", command, port, e);
            }
            result
        })
        .await
        .map_err(|e| ChannelError::Io(std::io::Error::other(e)))?
    }
}

/// Run one command over an open port
pub fn exchange<P>(port: &mut P, command: &str, timeout: Duration) -> Result<String, ChannelError>
where
    P: Read + Write + ?Sized,
{
    port.write_all(format!("{}\r\n", command).as_bytes())?;
    port.flush()?;

    let deadline = Instant::now() + timeout;
    let mut pending = String::new();
    let mut body: Vec<String> = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        if Instant::now() >= deadline {
            return Err(ChannelError::NoResponse(command.to_string()));
        }

        match port.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(IDLE_BACKOFF);
                continue;
            }
            Ok(n) => pending.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e.into()),
        }

        while let Some(pos) = pending.find('\n') {
            let raw: String = pending.drain(..=pos).collect();
            let line = raw.trim();
            if line.is_empty() || line == command {
                continue;
            }
            if line == "OK" {
                return Ok(body.join("\n"));
            }
            if line.contains("ERROR") {
                return Err(ChannelError::CommandFailed {
                    command: command.to_string(),
                    response: line.to_string(),
                });
            }
            body.push(line.to_string());
        }
    }
}

/// Value after `prefix` on the first response line carrying it
pub fn field<'a>(response: &'a str, prefix: &str) -> Result<&'a str, ChannelError> {
    response
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
        .ok_or_else(|| ChannelError::Protocol(format!("missing '{}' in '{}'", prefix, response)))
}
