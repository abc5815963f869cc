//! In-memory ModemManager model
//!
//! Holds a tree of objects shaped like ModemManager's, applies the state
//! changes the real service would make for each method call, and records every
//! mutating call. Failures can be injected per method or per property.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BusSignal, ManagedObject, ModemBus, PropValue, SIGNAL_QUEUE_CAPACITY};
use super::{
    BEARER_INTERFACE, CALL_DIRECTION_INCOMING, CALL_DIRECTION_OUTGOING, CALL_INTERFACE,
    MESSAGING_INTERFACE, MODEM_3GPP_INTERFACE, MODEM_INTERFACE, SIGNAL_INTERFACE, SIMPLE_INTERFACE, SIM_INTERFACE, SMS_INTERFACE, VOICE_INTERFACE,
};
use crate::{EngineError, Result};

const OBJECT_ROOT: &str = "/org/freedesktop/ModemManager1";

/// A mutating call observed by [`MemoryBus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    SimpleConnect { modem: String },
    SimpleDisconnect { modem: String, bearer: String },
    MessagingCreate { modem: String, number: String, text: String },
    MessagingDelete { modem: String, sms: String },
    SmsSend { sms: String },
    SetCurrentSlots { modem: String, slot: u32 },
    SignalSetup { modem: String, rate: u32 },
}

type Properties = BTreeMap<String, PropValue>;

#[derive(Default)]
struct State {
    objects: BTreeMap<String, BTreeMap<String, Properties>>,
    status_extras: BTreeMap<String, PropValue>,
    calls: Vec<BusCall>,
    failures: HashMap<String, String>,
    subscribers: Vec<(String, String, mpsc::Sender<BusSignal>)>,
    next_id: u32,
}

impl State {
    fn check(&self, key: &str) -> Result<()> {
        match self.failures.get(key) {
            Some(message) => Err(EngineError::BusCall(message.clone())),
            None => Ok(()),
        }
    }

    fn props_mut(&mut self, path: &str, interface: &str) -> Result<&mut Properties> {
        self.objects
            .get_mut(path)
            .and_then(|ifaces| ifaces.get_mut(interface))
            .ok_or_else(|| EngineError::BusCall(format!("No such object {} ({})", path, interface)))
    }

    fn next_path(&mut self, kind: &str) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("{}/{}/{}", OBJECT_ROOT, kind, id)
    }

    fn modem_state(&self, modem: &str) -> Option<i64> {
        self.objects
            .get(modem)?
            .get(MODEM_INTERFACE)?
            .get("State")?
            .as_i64()
    }

    fn set(&mut self, path: &str, interface: &str, name: &str, value: PropValue) {
        self.objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    fn messages(&self, modem: &str) -> Vec<String> {
        self.objects
            .get(modem)
            .and_then(|i| i.get(MESSAGING_INTERFACE))
            .and_then(|p| p.get("Messages"))
            .and_then(PropValue::as_list)
            .map(|list| list.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    fn set_messages(&mut self, modem: &str, messages: Vec<String>) {
        let list = messages.into_iter().map(PropValue::Path).collect();
        self.set(modem, MESSAGING_INTERFACE, "Messages", PropValue::List(list));
    }
}

/// In-memory [`ModemBus`]
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<State>,
}

impl MemoryBus {
    /// Create an empty bus with no objects
    pub fn new() -> Self {
        Self::default()
    }

    /// A registered LTE modem with a SIM, two stored messages and signal metrics
    pub fn simulated() -> Self {
        let bus = Self::new();
        let modem = format!("{}/Modem/0", OBJECT_ROOT);
        let sim = format!("{}/SIM/0", OBJECT_ROOT);

        bus.add_object(
            &modem,
            MODEM_INTERFACE,
            [
                ("State", PropValue::I32(8)),
                ("AccessTechnologies", PropValue::U32(16384)),
                ("SignalQuality", PropValue::List(vec![PropValue::U32(72), PropValue::Bool(true)])),
                ("Sim", PropValue::Path(sim.clone())),
                ("Bearers", PropValue::List(Vec::new())),
                ("PrimarySimSlot", PropValue::U32(1)),
            ],
        );
        bus.add_object(
            &modem,
            MODEM_3GPP_INTERFACE,
            [
                ("RegistrationState", PropValue::U32(1)),
                ("OperatorName", PropValue::from("Simulated Mobile")),
            ],
        );
        bus.add_object(&modem, SIMPLE_INTERFACE, Vec::<(&str, PropValue)>::new());
        bus.add_object(&modem, MESSAGING_INTERFACE, [("Messages", PropValue::List(Vec::new()))]);
        bus.add_object(&modem, VOICE_INTERFACE, Vec::<(&str, PropValue)>::new());
        bus.add_object(
            &modem,
            SIGNAL_INTERFACE,
            [
                ("Rate", PropValue::U32(0)),
                (
                    "Lte",
                    PropValue::dict([
                        ("rsrp", PropValue::F64(-97.0)),
                        ("rsrq", PropValue::F64(-11.0)),
                        ("snr", PropValue::F64(12.4)),
                    ]),
                ),
            ],
        );
        bus.add_object(
            &sim,
            SIM_INTERFACE,
            [
                ("OperatorName", PropValue::from("Simulated Mobile")),
                ("SimIdentifier", PropValue::from("8944500000000000001")),
            ],
        );

        bus.store_sms(&modem, "+15550100", "Welcome to the simulated network", "2026-01-05T09:30:00+00:00");
        bus.store_sms(&modem, "+15550123", "Your code is 4711", "2026-01-06T18:02:11+00:00");
        bus
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or extend an object with one interface and its properties
    pub fn add_object<I, K>(&self, path: &str, interface: &str, properties: I)
    where
        I: IntoIterator<Item = (K, PropValue)>,
        K: Into<String>,
    {
        let mut state = self.state();
        let props = state
            .objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default();
        for (name, value) in properties {
            props.insert(name.into(), value);
        }
    }

    pub fn set_property(&self, path: &str, interface: &str, name: &str, value: PropValue) {
        self.state().set(path, interface, name, value);
    }

    pub fn remove_object(&self, path: &str) {
        self.state().objects.remove(path);
    }

    pub fn has_object(&self, path: &str) -> bool {
        self.state().objects.contains_key(path)
    }

    /// Extra entries returned by `Simple.GetStatus` besides `state`
    pub fn set_status_entry(&self, key: &str, value: PropValue) {
        self.state().status_extras.insert(key.to_string(), value);
    }

    /// Make every call of `method` fail with `message`
    pub fn fail(&self, method: &str, message: &str) {
        self.state().failures.insert(method.to_string(), message.to_string());
    }

    /// Make reads of one property fail
    pub fn fail_property(&self, path: &str, name: &str, message: &str) {
        self.fail(&format!("Get:{}:{}", path, name), message);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Mutating calls in the order they were made
    pub fn calls(&self) -> Vec<BusCall> {
        self.state().calls.clone()
    }

    /// Store a received message on `modem` without announcing it
    pub fn store_sms(&self, modem: &str, number: &str, text: &str, timestamp: &str) -> String {
        let mut state = self.state();
        let path = state.next_path("SMS");
        let mut props = Properties::new();
        props.insert("Number".into(), PropValue::from(number));
        props.insert("Text".into(), PropValue::from(text));
        props.insert("Timestamp".into(), PropValue::from(timestamp));
        props.insert("MessageReference".into(), PropValue::U32(0));
        props.insert("State".into(), PropValue::U32(3));
        state
            .objects
            .entry(path.clone())
            .or_default()
            .insert(SMS_INTERFACE.to_string(), props);

        let mut messages = state.messages(modem);
        messages.push(path.clone());
        state.set_messages(modem, messages);
        path
    }

    /// Store a message and emit `Messaging.Added` for it
    pub async fn receive_sms(&self, modem: &str, number: &str, text: &str) -> String {
        let timestamp = chrono::Local::now().to_rfc3339();
        let path = self.store_sms(modem, number, text, &timestamp);
        self.emit(
            modem,
            MESSAGING_INTERFACE,
            "Added",
            vec![PropValue::Path(path.clone()), PropValue::Bool(true)],
        )
        .await;
        path
    }

    /// Create an incoming call object and emit `Voice.CallAdded` for it
    pub async fn ring(&self, modem: &str, number: &str) -> String {
        self.add_call(modem, number, CALL_DIRECTION_INCOMING).await
    }

    /// Create an outgoing call object and emit `Voice.CallAdded` for it
    pub async fn dial(&self, modem: &str, number: &str) -> String {
        self.add_call(modem, number, CALL_DIRECTION_OUTGOING).await
    }

    async fn add_call(&self, modem: &str, number: &str, direction: u32) -> String {
        let path = {
            let mut state = self.state();
            let path = state.next_path("Call");
            state.set(&path, CALL_INTERFACE, "Number", PropValue::from(number));
            state.set(&path, CALL_INTERFACE, "Direction", PropValue::U32(direction));
            path
        };
        self.emit(modem, VOICE_INTERFACE, "CallAdded", vec![PropValue::Path(path.clone())])
            .await;
        path
    }

    /// Deliver a signal to every matching subscription; returns how many got it
    pub async fn emit(&self, path: &str, interface: &str, member: &str, args: Vec<PropValue>) -> usize {
        let senders: Vec<mpsc::Sender<BusSignal>> = {
            let mut state = self.state();
            state.subscribers.retain(|(_, _, tx)| !tx.is_closed());
            state
                .subscribers
                .iter()
                .filter(|(p, i, _)| p == path && i == interface)
                .map(|(_, _, tx)| tx.clone())
                .collect()
        };

        let signal = BusSignal {
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        };

        let mut delivered = 0;
        for tx in senders {
            match tx.try_send(signal.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(signal)) => {
                    warn!("Signal queue for {} on {} is full", interface, path);
                    if tx.send(signal).await.is_ok() {
                        delivered += 1;
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

#[async_trait]
impl ModemBus for MemoryBus {
    async fn connect(&self) -> Result<()> {
        self.state()
            .check("Connect-bus")
            .map_err(|e| EngineError::Initialization(e.to_string()))
    }

    async fn managed_objects(&self) -> Result<Vec<ManagedObject>> {
        let state = self.state();
        state.check("GetManagedObjects")?;
        Ok(state
            .objects
            .iter()
            .map(|(path, interfaces)| ManagedObject {
                path: path.clone(),
                interfaces: interfaces.clone(),
            })
            .collect())
    }

    async fn property(&self, path: &str, interface: &str, name: &str) -> Result<PropValue> {
        let state = self.state();
        state.check("Get")?;
        state.check(&format!("Get:{}:{}", path, name))?;
        state
            .objects
            .get(path)
            .and_then(|ifaces| ifaces.get(interface))
            .and_then(|props| props.get(name))
            .cloned()
            .ok_or_else(|| {
                EngineError::BusCall(format!("No such property {}.{} on {}", interface, name, path))
            })
    }

    async fn simple_status(&self, modem: &str) -> Result<BTreeMap<String, PropValue>> {
        let state = self.state();
        state.check("GetStatus")?;
        let current = state
            .modem_state(modem)
            .ok_or_else(|| EngineError::BusCall(format!("No modem at {}", modem)))?;

        let mut status = state.status_extras.clone();
        status.insert("state".to_string(), PropValue::I64(current));
        Ok(status)
    }

    async fn simple_connect(&self, modem: &str) -> Result<String> {
        let mut state = self.state();
        state.check("Connect")?;
        state.calls.push(BusCall::SimpleConnect {
            modem: modem.to_string(),
        });

        let bearer = state.next_path("Bearer");
        state.set(&bearer, BEARER_INTERFACE, "Connected", PropValue::Bool(true));
        state.set(
            &bearer,
            BEARER_INTERFACE,
            "Ip4Config",
            PropValue::dict([
                ("method", PropValue::U32(3)),
                ("address", PropValue::from("10.64.12.7")),
                ("prefix", PropValue::U32(30)),
            ]),
        );
        state.set(
            &bearer,
            BEARER_INTERFACE,
            "Stats",
            PropValue::dict([
                ("duration", PropValue::U32(0)),
                ("rx-bytes", PropValue::U64(0)),
                ("tx-bytes", PropValue::U64(0)),
            ]),
        );

        let modem_props = state.props_mut(modem, MODEM_INTERFACE)?;
        let mut bearers = modem_props
            .get("Bearers")
            .and_then(PropValue::as_list)
            .map(<[PropValue]>::to_vec)
            .unwrap_or_default();
        bearers.push(PropValue::Path(bearer.clone()));
        modem_props.insert("Bearers".into(), PropValue::List(bearers));
        modem_props.insert("State".into(), PropValue::I32(11));

        debug!("Memory bus connected bearer {}", bearer);
        Ok(bearer)
    }

    async fn simple_disconnect(&self, modem: &str, bearer: &str) -> Result<()> {
        let mut state = self.state();
        state.check("Disconnect")?;
        state.calls.push(BusCall::SimpleDisconnect {
            modem: modem.to_string(),
            bearer: bearer.to_string(),
        });

        let props = state.props_mut(bearer, BEARER_INTERFACE)?;
        props.insert("Connected".into(), PropValue::Bool(false));
        props.insert("Ip4Config".into(), PropValue::Dict(BTreeMap::new()));
        state.set(modem, MODEM_INTERFACE, "State", PropValue::I32(8));
        Ok(())
    }

    async fn messaging_list(&self, modem: &str) -> Result<Vec<String>> {
        let state = self.state();
        state.check("List")?;
        Ok(state.messages(modem))
    }

    async fn messaging_create(&self, modem: &str, number: &str, text: &str) -> Result<String> {
        let path = {
            let mut state = self.state();
            state.check("Create")?;
            state.calls.push(BusCall::MessagingCreate {
                modem: modem.to_string(),
                number: number.to_string(),
                text: text.to_string(),
            });

            let path = state.next_path("SMS");
            state.set(&path, SMS_INTERFACE, "Number", PropValue::from(number));
            state.set(&path, SMS_INTERFACE, "Text", PropValue::from(text));
            state.set(&path, SMS_INTERFACE, "State", PropValue::U32(0));
            let mut messages = state.messages(modem);
            messages.push(path.clone());
            state.set_messages(modem, messages);
            path
        };

        // Locally created messages are announced with received = false
        self.emit(
            modem,
            MESSAGING_INTERFACE,
            "Added",
            vec![PropValue::Path(path.clone()), PropValue::Bool(false)],
        )
        .await;
        Ok(path)
    }

    async fn messaging_delete(&self, modem: &str, sms: &str) -> Result<()> {
        let mut state = self.state();
        state.check("Delete")?;
        state.calls.push(BusCall::MessagingDelete {
            modem: modem.to_string(),
            sms: sms.to_string(),
        });

        let mut messages = state.messages(modem);
        let before = messages.len();
        messages.retain(|m| m != sms);
        if messages.len() == before {
            return Err(EngineError::BusCall(format!("No such message {}", sms)));
        }
        state.set_messages(modem, messages);
        state.objects.remove(sms);
        Ok(())
    }

    async fn sms_send(&self, sms: &str) -> Result<()> {
        let mut state = self.state();
        state.check("Send")?;
        state.calls.push(BusCall::SmsSend {
            sms: sms.to_string(),
        });
        state.props_mut(sms, SMS_INTERFACE)?.insert("State".into(), PropValue::U32(5));
        Ok(())
    }

    async fn set_current_slots(&self, modem: &str, slot: u32) -> Result<()> {
        let mut state = self.state();
        state.check("SetCurrentSlots")?;
        state.calls.push(BusCall::SetCurrentSlots {
            modem: modem.to_string(),
            slot,
        });
        state.set(modem, MODEM_INTERFACE, "PrimarySimSlot", PropValue::U32(slot));
        Ok(())
    }

    async fn signal_setup(&self, modem: &str, rate_secs: u32) -> Result<()> {
        let mut state = self.state();
        state.check("Setup")?;
        state.calls.push(BusCall::SignalSetup {
            modem: modem.to_string(),
            rate: rate_secs,
        });
        state.set(modem, SIGNAL_INTERFACE, "Rate", PropValue::U32(rate_secs));
        Ok(())
    }

    async fn subscribe(&self, path: &str, interface: &str) -> Result<mpsc::Receiver<BusSignal>> {
        let mut state = self.state();
        state.check("Subscribe")?;
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        state
            .subscribers
            .push((path.to_string(), interface.to_string(), tx));
        Ok(rx)
    }
}
