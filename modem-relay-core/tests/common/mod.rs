//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modem_relay_core::engine::{EsimModule, ModemManagerEngine, SimulatedAt};
use modem_relay_core::{ChatId, ChatTransport, Engine, MemoryBus, ModemBus, TransportError};

pub const MODEM: &str = "/org/freedesktop/ModemManager1/Modem/0";
pub const ADMIN: ChatId = ChatId(4242);

/// Transport that records deliveries and can be told to fail
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<(ChatId, String)>>,
    failing: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn delivered(&self) -> Vec<(ChatId, String)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were delivered
    pub async fn wait_for(&self, count: usize) -> Vec<(ChatId, String)> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let delivered = self.delivered();
            if delivered.len() >= count || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        if *self.failing.lock().unwrap() {
            return Err(TransportError {
                chat,
                reason: "chat service unreachable".to_string(),
            });
        }
        self.delivered.lock().unwrap().push((chat, text.to_string()));
        Ok(())
    }
}

/// Initialized engine over a simulated bus, plus the bus itself
pub async fn simulated_engine() -> (ModemManagerEngine, Arc<MemoryBus>) {
    let bus = Arc::new(MemoryBus::simulated());
    let dyn_bus: Arc<dyn ModemBus> = bus.clone();
    let esim = EsimModule::new(Arc::new(SimulatedAt::new()));
    let mut engine = ModemManagerEngine::new(dyn_bus, Some(esim));
    engine.init().await.expect("simulated engine initializes");
    (engine, bus)
}
