//! ModemManager over the DBus system bus

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, MessageStream};

use super::{BusSignal, ManagedObject, ModemBus, PropValue, MM_PATH, MM_SERVICE};
use super::{MESSAGING_INTERFACE, MODEM_INTERFACE, SIGNAL_INTERFACE, SIMPLE_INTERFACE, SMS_INTERFACE};
use super::SIGNAL_QUEUE_CAPACITY;
use crate::{EngineError, Result};

type ObjectTree = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>;

/// zbus-backed [`ModemBus`]
pub struct SystemBus {
    connection: OnceCell<Connection>,
}

impl SystemBus {
    /// Create a backend; the connection opens on first use
    pub fn new() -> Self {
        Self {
            connection: OnceCell::new(),
        }
    }

    async fn conn(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                let conn = Connection::system().await.map_err(|e| {
                    EngineError::Initialization(format!("Failed to connect to system bus: {}", e))
                })?;
                info!("Connected to ModemManager via DBus");
                Ok(conn)
            })
            .await
    }

    async fn call<B>(&self, path: &str, interface: &str, method: &str, body: &B) -> Result<zbus::Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        let conn = self.conn().await?;
        debug!("Calling {}.{} on {}", interface, method, path);
        conn.call_method(Some(MM_SERVICE), path, Some(interface), method, body)
            .await
            .map_err(|e| EngineError::BusCall(format!("{}.{} on {}: {}", interface, method, path, e)))
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a borrowed variant into a [`PropValue`]
pub(crate) fn from_value(value: &Value<'_>) -> PropValue {
    match value {
        Value::Bool(v) => PropValue::Bool(*v),
        Value::U8(v) => PropValue::U32(u32::from(*v)),
        Value::I16(v) => PropValue::I32(i32::from(*v)),
        Value::U16(v) => PropValue::U32(u32::from(*v)),
        Value::I32(v) => PropValue::I32(*v),
        Value::U32(v) => PropValue::U32(*v),
        Value::I64(v) => PropValue::I64(*v),
        Value::U64(v) => PropValue::U64(*v),
        Value::F64(v) => PropValue::F64(*v),
        Value::Str(s) => PropValue::Str(s.to_string()),
        Value::ObjectPath(p) => PropValue::Path(p.to_string()),
        Value::Value(inner) => from_value(inner),
        Value::Array(arr) => PropValue::List(arr.iter().map(from_value).collect()),
        Value::Structure(s) => PropValue::List(s.fields().iter().map(from_value).collect()),
        Value::Dict(_) => from_dict(value),
        other => PropValue::Unsupported(other.value_signature().to_string()),
    }
}

fn from_dict(value: &Value<'_>) -> PropValue {
    let owned = value
        .try_clone()
        .ok()
        .and_then(|v| OwnedValue::try_from(v).ok());
    match owned.map(HashMap::<String, OwnedValue>::try_from) {
        Some(Ok(map)) => from_map(&map),
        _ => PropValue::Unsupported(value.value_signature().to_string()),
    }
}

fn from_map(map: &HashMap<String, OwnedValue>) -> PropValue {
    PropValue::Dict(props_from_map(map))
}

fn props_from_map(map: &HashMap<String, OwnedValue>) -> BTreeMap<String, PropValue> {
    map.iter().map(|(k, v)| (k.clone(), from_value(v))).collect()
}

fn object_path(path: &str) -> Result<ObjectPath<'_>> {
    ObjectPath::try_from(path).map_err(|e| EngineError::BusCall(format!("invalid object path '{}': {}", path, e)))
}

fn decode_signal(msg: &zbus::Message) -> Option<BusSignal> {
    let header = msg.header();
    let member = header.member()?.to_string();
    let interface = header.interface().map(|i| i.to_string()).unwrap_or_default();
    let path = header.path().map(|p| p.to_string()).unwrap_or_default();

    let body = msg.body();
    let args = if let Ok((object, flag)) = body.deserialize::<(OwnedObjectPath, bool)>() {
        vec![PropValue::Path(object.to_string()), PropValue::Bool(flag)]
    } else if let Ok(object) = body.deserialize::<OwnedObjectPath>() {
        vec![PropValue::Path(object.to_string())]
    } else {
        debug!("Signal {}.{} has an undecodable body", interface, member);
        Vec::new()
    };

    Some(BusSignal {
        path,
        interface,
        member,
        args,
    })
}

#[async_trait]
impl ModemBus for SystemBus {
    async fn connect(&self) -> Result<()> {
        self.conn().await.map(|_| ())
    }

    async fn managed_objects(&self) -> Result<Vec<ManagedObject>> {
        let msg = self
            .call(MM_PATH, "org.freedesktop.DBus.ObjectManager", "GetManagedObjects", &())
            .await?;
        let tree: ObjectTree = msg.body().deserialize()?;

        let mut objects: Vec<ManagedObject> = tree
            .into_iter()
            .map(|(path, interfaces)| ManagedObject {
                path: path.to_string(),
                interfaces: interfaces
                    .iter()
                    .map(|(iface, props)| (iface.clone(), props_from_map(props)))
                    .collect(),
            })
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("ModemManager exports {} objects", objects.len());
        Ok(objects)
    }

    async fn property(&self, path: &str, interface: &str, name: &str) -> Result<PropValue> {
        let msg = self
            .call(path, "org.freedesktop.DBus.Properties", "Get", &(interface, name))
            .await?;
        let value: OwnedValue = msg.body().deserialize()?;
        Ok(from_value(&value))
    }

    async fn simple_status(&self, modem: &str) -> Result<BTreeMap<String, PropValue>> {
        let msg = self.call(modem, SIMPLE_INTERFACE, "GetStatus", &()).await?;
        let status: HashMap<String, OwnedValue> = msg.body().deserialize()?;
        Ok(props_from_map(&status))
    }

    async fn simple_connect(&self, modem: &str) -> Result<String> {
        let properties: HashMap<&str, Value<'_>> = HashMap::new();
        let msg = self
            .call(modem, SIMPLE_INTERFACE, "Connect", &(properties,))
            .await?;
        let bearer: OwnedObjectPath = msg.body().deserialize()?;
        Ok(bearer.to_string())
    }

    async fn simple_disconnect(&self, modem: &str, bearer: &str) -> Result<()> {
        let bearer = object_path(bearer)?;
        self.call(modem, SIMPLE_INTERFACE, "Disconnect", &(bearer,))
            .await?;
        Ok(())
    }

    async fn messaging_list(&self, modem: &str) -> Result<Vec<String>> {
        let msg = self.call(modem, MESSAGING_INTERFACE, "List", &()).await?;
        let paths: Vec<OwnedObjectPath> = msg.body().deserialize()?;
        Ok(paths.into_iter().map(|p| p.to_string()).collect())
    }

    async fn messaging_create(&self, modem: &str, number: &str, text: &str) -> Result<String> {
        let mut properties: HashMap<&str, Value<'_>> = HashMap::new();
        properties.insert("number", Value::from(number));
        properties.insert("text", Value::from(text));

        let msg = self
            .call(modem, MESSAGING_INTERFACE, "Create", &(properties,))
            .await?;
        let sms: OwnedObjectPath = msg.body().deserialize()?;
        Ok(sms.to_string())
    }

    async fn messaging_delete(&self, modem: &str, sms: &str) -> Result<()> {
        let sms = object_path(sms)?;
        self.call(modem, MESSAGING_INTERFACE, "Delete", &(sms,))
            .await?;
        Ok(())
    }

    async fn sms_send(&self, sms: &str) -> Result<()> {
        self.call(sms, SMS_INTERFACE, "Send", &()).await?;
        Ok(())
    }

    async fn set_current_slots(&self, modem: &str, slot: u32) -> Result<()> {
        self.call(modem, MODEM_INTERFACE, "SetCurrentSlots", &(vec![slot],))
            .await?;
        Ok(())
    }

    async fn signal_setup(&self, modem: &str, rate_secs: u32) -> Result<()> {
        self.call(modem, SIGNAL_INTERFACE, "Setup", &(rate_secs,))
            .await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str, interface: &str) -> Result<mpsc::Receiver<BusSignal>> {
        let conn = self.conn().await?;

        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .path(path.to_string())?
            .interface(interface.to_string())?
            .build();

        let mut stream = MessageStream::for_match_rule(rule, conn, Some(SIGNAL_QUEUE_CAPACITY)).await?;
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let label = format!("{} on {}", interface, path);
        info!("Subscribed to {}", label);

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let msg = match item {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Error receiving DBus signal for {}: {}", label, e);
                        continue;
                    }
                };

                let Some(signal) = decode_signal(&msg) else {
                    continue;
                };

                match tx.try_send(signal) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(signal)) => {
                        warn!(
                            "Signal queue for {} is full ({} pending); listener is falling behind",
                            label, SIGNAL_QUEUE_CAPACITY
                        );
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            debug!("Signal forwarder for {} stopped", label);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_scalars() {
        assert_eq!(from_value(&Value::from(11i32)), PropValue::I32(11));
        assert_eq!(from_value(&Value::from(42u32)), PropValue::U32(42));
        assert_eq!(from_value(&Value::from("Vodafone")), PropValue::Str("Vodafone".into()));
        assert_eq!(from_value(&Value::from(true)), PropValue::Bool(true));
    }

    #[test]
    fn test_from_value_nested_variant() {
        let inner = Value::from(-95.5f64);
        let wrapped = Value::Value(Box::new(inner));
        assert_eq!(from_value(&wrapped), PropValue::F64(-95.5));
    }

    #[test]
    fn test_from_value_object_path() {
        let path = ObjectPath::try_from("/org/freedesktop/ModemManager1/SMS/3").unwrap();
        let value = Value::from(path);
        assert_eq!(
            from_value(&value).as_path(),
            Some("/org/freedesktop/ModemManager1/SMS/3")
        );
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert(
            "rsrp".to_string(),
            OwnedValue::try_from(Value::from(-101.0f64)).unwrap(),
        );
        map.insert(
            "snr".to_string(),
            OwnedValue::try_from(Value::from(9.5f64)).unwrap(),
        );

        let value = from_map(&map);
        assert_eq!(value.get("rsrp").and_then(PropValue::as_f64), Some(-101.0));
        assert_eq!(value.get("snr").and_then(PropValue::as_f64), Some(9.5));
    }

    #[tokio::test]
    #[ignore = "Requires ModemManager on the system bus"]
    async fn test_managed_objects_live() {
        let bus = SystemBus::new();
        let objects = bus.managed_objects().await.unwrap();
        let paths: Vec<_> = objects.iter().map(|o| o.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }
}
