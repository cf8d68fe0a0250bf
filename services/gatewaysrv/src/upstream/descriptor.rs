//! Device and object descriptors as served by the upstream server
//!
//! Objects are JSON maps keyed by property id (`"75"`, `"77"`, ...). The
//! `"371"` property-list carries the transport and Modbus parameters,
//! either as an object or as a JSON-encoded string.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::warn;

use crate::error::{ErrorExt, GatewaySrvError, Result};
use crate::model::device::{BACNET_PORT, MODBUS_TCP_PORT};
use crate::model::{
    DeviceDescriptor, DeviceTransport, Endian, FunctionCode, ModbusPoint, ObjectKey, ObjectSpec,
    ObjectType, Parity, PropertyId, Protocol, SerialSettings, DEFAULT_RESOLUTION,
};

/// `{"success": bool, "data": [...]}`
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    /// Data of a successful envelope
    pub fn into_data(self) -> Result<Vec<Value>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(GatewaySrvError::upstream(format!(
                "Request unsuccessful: {}",
                self.message.unwrap_or_else(|| "no message".to_string())
            )))
        }
    }
}

// ============================================================================
// Device
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceProperties {
    protocol: String,
    tcp: Option<TcpSection>,
    rtu: Option<RtuSection>,
    bacnet: Option<BacnetSection>,
    apdu_timeout: Option<u64>,
    retries: Option<u32>,
    poll_period: Option<f64>,
    send_period: Option<f64>,
    reconnect_period: Option<f64>,
    #[serde(default)]
    object_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TcpSection {
    address: Ipv4Addr,
    port: Option<u16>,
    unit: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RtuSection {
    port: String,
    baudrate: Option<u32>,
    parity: Option<String>,
    bytesize: Option<u8>,
    stopbits: Option<u8>,
    unit: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct BacnetSection {
    address: Ipv4Addr,
    port: Option<u16>,
}

/// Build a descriptor from the first element of a device response
pub fn parse_device(device_id: u32, data: &[Value]) -> Result<DeviceDescriptor> {
    let entry = data
        .first()
        .ok_or_else(|| GatewaySrvError::device_not_found(device_id))?;

    if let Some(reported) = entry
        .get(PropertyId::DeviceId.json_key())
        .and_then(Value::as_u64)
    {
        if reported != u64::from(device_id) {
            warn!("Device {} answered as device {}", device_id, reported);
        }
    }

    let props: DeviceProperties = property_list(entry)
        .config_error(&format!("Device {} propertyList", device_id))?;
    let protocol: Protocol = props.protocol.parse()?;

    let defaults = SerialSettings::default();
    let (transport, unit) = match protocol {
        Protocol::ModbusTcp | Protocol::ModbusRtuOverTcp => {
            let tcp = props.tcp.ok_or_else(|| missing(device_id, "tcp"))?;
            (
                DeviceTransport::Tcp {
                    address: tcp.address,
                    port: tcp.port.unwrap_or(MODBUS_TCP_PORT),
                },
                tcp.unit.unwrap_or(1),
            )
        },
        Protocol::ModbusRtu => {
            let rtu = props.rtu.ok_or_else(|| missing(device_id, "rtu"))?;
            let parity = match rtu.parity {
                Some(p) => p.parse::<Parity>()?,
                None => Parity::None,
            };
            (
                DeviceTransport::Serial(SerialSettings {
                    port: rtu.port,
                    baudrate: rtu.baudrate.unwrap_or(defaults.baudrate),
                    parity,
                    bytesize: rtu.bytesize.unwrap_or(defaults.bytesize),
                    stopbits: rtu.stopbits.unwrap_or(defaults.stopbits),
                }),
                rtu.unit.unwrap_or(1),
            )
        },
        Protocol::Bacnet => {
            let bacnet = props.bacnet.ok_or_else(|| missing(device_id, "bacnet"))?;
            (
                DeviceTransport::Bacnet {
                    address: bacnet.address,
                    port: bacnet.port.unwrap_or(BACNET_PORT),
                },
                0,
            )
        },
    };

    let mut descriptor = DeviceDescriptor::new(device_id, protocol, transport);
    descriptor.unit = unit;
    if let Some(name) = entry.get(PropertyId::ObjectName.json_key()).and_then(Value::as_str) {
        descriptor.name = name.to_string();
    }
    if let Some(ms) = props.apdu_timeout {
        descriptor.apdu_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = props.retries {
        descriptor.retries = retries;
    }
    if let Some(period) = props.poll_period {
        descriptor.poll_period = seconds(period, "pollPeriod")?;
        descriptor.send_period = descriptor.poll_period;
    }
    if let Some(period) = props.send_period {
        descriptor.send_period = seconds(period, "sendPeriod")?;
    }
    if let Some(period) = props.reconnect_period {
        descriptor.reconnect_period = seconds(period, "reconnectPeriod")?;
    }

    descriptor.object_types = if props.object_types.is_empty() {
        ObjectType::ALL
            .iter()
            .copied()
            .filter(|t| *t != ObjectType::Device)
            .collect()
    } else {
        props
            .object_types
            .iter()
            .map(|name| name.parse::<ObjectType>().map_err(GatewaySrvError::config))
            .collect::<Result<Vec<_>>>()?
    };

    descriptor.validate()?;
    Ok(descriptor)
}

fn missing(device_id: u32, section: &str) -> GatewaySrvError {
    GatewaySrvError::config(format!(
        "Device {}: propertyList has no '{}' section",
        device_id, section
    ))
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectProperties {
    modbus: Option<ModbusSection>,
    poll_period: Option<f64>,
    send_period: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModbusSection {
    address: u16,
    #[serde(default = "default_quantity")]
    quantity: u16,
    function_read: FunctionCode,
    function_write: Option<FunctionCode>,
    data_type: String,
    data_length: u8,
    scale: Option<f64>,
    offset: Option<f64>,
    byte_order: Option<String>,
    word_order: Option<String>,
    bit: Option<u8>,
}

fn default_quantity() -> u16 {
    1
}

impl ModbusSection {
    fn into_point(self) -> Result<ModbusPoint> {
        let order = |o: Option<String>| -> Result<Endian> {
            o.map(|s| s.parse()).transpose().map(Option::unwrap_or_default)
        };
        Ok(ModbusPoint {
            address: self.address,
            quantity: self.quantity,
            function_read: self.function_read,
            function_write: self.function_write,
            data_type: self.data_type.parse()?,
            data_length: self.data_length,
            byte_order: order(self.byte_order)?,
            word_order: order(self.word_order)?,
            scale: self.scale.unwrap_or(1.0),
            offset: self.offset.unwrap_or(0.0),
            bit: self.bit,
        })
    }
}

/// Build the object definition of `object_type` on `device`
pub fn parse_object(
    device: &DeviceDescriptor,
    object_type: ObjectType,
    entry: &Value,
) -> Result<ObjectSpec> {
    let object_id = object_instance(entry.get(PropertyId::ObjectIdentifier.json_key()))
        .ok_or_else(|| {
            GatewaySrvError::config(format!(
                "Device {}: {} entry without object identifier",
                device.device_id, object_type
            ))
        })?;
    let key = ObjectKey::new(device.device_id, object_type, object_id);

    let props: ObjectProperties = match entry.get(PropertyId::PropertyList.json_key()) {
        Some(_) => property_list(entry).config_error(&format!("Object {} propertyList", key))?,
        None => ObjectProperties::default(),
    };

    let name = entry
        .get(PropertyId::ObjectName.json_key())
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}", object_type, object_id));

    let mut spec = match (device.protocol.is_modbus(), props.modbus) {
        (true, Some(section)) => ObjectSpec::modbus(key, name, section.into_point()?),
        (true, None) => {
            return Err(GatewaySrvError::config(format!(
                "Object {} on a Modbus device has no modbus section",
                key
            )))
        },
        (false, _) => ObjectSpec::bacnet(key, name),
    };

    spec.resolution = entry
        .get(PropertyId::Resolution.json_key())
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_RESOLUTION);
    spec.poll_period = props
        .poll_period
        .map(|p| seconds(p, "pollPeriod"))
        .transpose()?;
    spec.send_period = props
        .send_period
        .map(|p| seconds(p, "sendPeriod"))
        .transpose()?;

    spec.validate()?;
    Ok(spec)
}

/// Integer id, `"type:id"` or a numeric string
fn object_instance(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let id = s.rsplit(':').next().unwrap_or(s);
            id.trim().parse().ok()
        },
        _ => None,
    }
}

fn property_list<T: DeserializeOwned>(entry: &Value) -> Result<T> {
    let list = entry
        .get(PropertyId::PropertyList.json_key())
        .ok_or_else(|| GatewaySrvError::data("missing property 371"))?;
    let parsed = match list {
        Value::String(s) => serde_json::from_str(s)?,
        other => serde_json::from_value(other.clone())?,
    };
    Ok(parsed)
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    if value.is_finite() && value > 0.0 {
        Ok(Duration::from_secs_f64(value))
    } else {
        Err(GatewaySrvError::config(format!(
            "{} must be a positive number of seconds, got {}",
            what, value
        )))
    }
}
