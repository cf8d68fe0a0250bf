//! Device descriptors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use super::object_type::ObjectType;
use crate::error::{GatewaySrvError, Result};

/// Default BACnet/IP UDP port
pub const BACNET_PORT: u16 = 47808;
/// Default Modbus TCP port
pub const MODBUS_TCP_PORT: u16 = 502;

/// Protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    ModbusTcp,
    ModbusRtu,
    ModbusRtuOverTcp,
    Bacnet,
}

impl Protocol {
    pub fn is_modbus(self) -> bool {
        !matches!(self, Self::Bacnet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus-tcp",
            Self::ModbusRtu => "modbus-rtu",
            Self::ModbusRtuOverTcp => "modbus-rtu-over-tcp",
            Self::Bacnet => "bacnet",
        }
    }
}

impl FromStr for Protocol {
    type Err = GatewaySrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "modbus-tcp" => Ok(Self::ModbusTcp),
            "modbus-rtu" => Ok(Self::ModbusRtu),
            "modbus-rtu-over-tcp" => Ok(Self::ModbusRtuOverTcp),
            "bacnet" | "bacnet-ip" => Ok(Self::Bacnet),
            other => Err(GatewaySrvError::config(format!("Unknown protocol: {}", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

impl FromStr for Parity {
    type Err = GatewaySrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Self::None),
            "E" | "EVEN" => Ok(Self::Even),
            "O" | "ODD" => Ok(Self::Odd),
            other => Err(GatewaySrvError::config(format!("Unknown parity: {}", other))),
        }
    }
}

/// Serial line settings of an RTU device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    pub baudrate: u32,
    pub parity: Parity,
    pub bytesize: u8,
    pub stopbits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            parity: Parity::None,
            bytesize: 8,
            stopbits: 1,
        }
    }
}

impl SerialSettings {
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(GatewaySrvError::config("Serial port path cannot be empty"));
        }
        if self.baudrate == 0 {
            return Err(GatewaySrvError::config("Baud rate must be greater than zero"));
        }
        if ![5, 6, 7, 8].contains(&self.bytesize) {
            return Err(GatewaySrvError::config("Byte size must be 5, 6, 7, or 8"));
        }
        if ![1, 2].contains(&self.stopbits) {
            return Err(GatewaySrvError::config("Stop bits must be 1 or 2"));
        }
        Ok(())
    }
}

/// Physical transport parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceTransport {
    /// Modbus TCP or RTU-over-TCP endpoint
    Tcp { address: Ipv4Addr, port: u16 },
    /// Modbus RTU serial line
    Serial(SerialSettings),
    /// BACnet/IP peer
    Bacnet { address: Ipv4Addr, port: u16 },
}

impl DeviceTransport {
    pub fn socket_addr(&self) -> Option<SocketAddrV4> {
        match self {
            Self::Tcp { address, port } | Self::Bacnet { address, port } => {
                Some(SocketAddrV4::new(*address, *port))
            },
            Self::Serial(_) => None,
        }
    }
}

/// Everything the engine needs to poll one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: u32,
    pub name: String,
    pub protocol: Protocol,
    pub transport: DeviceTransport,
    /// Modbus unit address (ignored for BACnet)
    pub unit: u8,
    pub apdu_timeout: Duration,
    pub retries: u32,
    pub poll_period: Duration,
    pub send_period: Duration,
    pub reconnect_period: Duration,
    pub object_types: Vec<ObjectType>,
}

impl DeviceDescriptor {
    pub const DEFAULT_APDU_TIMEOUT: Duration = Duration::from_millis(3000);
    pub const DEFAULT_RETRIES: u32 = 1;
    pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);
    pub const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_secs(30);

    /// Descriptor with default timing for the given transport
    pub fn new(device_id: u32, protocol: Protocol, transport: DeviceTransport) -> Self {
        Self {
            device_id,
            name: format!("device-{}", device_id),
            protocol,
            transport,
            unit: 1,
            apdu_timeout: Self::DEFAULT_APDU_TIMEOUT,
            retries: Self::DEFAULT_RETRIES,
            poll_period: Self::DEFAULT_POLL_PERIOD,
            send_period: Self::DEFAULT_POLL_PERIOD,
            reconnect_period: Self::DEFAULT_RECONNECT_PERIOD,
            object_types: Vec::new(),
        }
    }

    /// Check protocol/transport agreement and timing sanity
    pub fn validate(&self) -> Result<()> {
        match (self.protocol, &self.transport) {
            (Protocol::ModbusTcp | Protocol::ModbusRtuOverTcp, DeviceTransport::Tcp { .. })
            | (Protocol::Bacnet, DeviceTransport::Bacnet { .. }) => {},
            (Protocol::ModbusRtu, DeviceTransport::Serial(settings)) => settings.validate()?,
            (protocol, transport) => {
                return Err(GatewaySrvError::config(format!(
                    "Device {}: protocol {} cannot use transport {:?}",
                    self.device_id, protocol, transport
                )));
            },
        }

        if self.apdu_timeout.is_zero() {
            return Err(GatewaySrvError::config(format!(
                "Device {}: apduTimeout must be greater than zero",
                self.device_id
            )));
        }
        if self.poll_period.is_zero() || self.reconnect_period.is_zero() {
            return Err(GatewaySrvError::config(format!(
                "Device {}: periods must be greater than zero",
                self.device_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("modbus-tcp".parse::<Protocol>().unwrap(), Protocol::ModbusTcp);
        assert_eq!(
            "MODBUS_RTU_OVER_TCP".parse::<Protocol>().unwrap(),
            Protocol::ModbusRtuOverTcp
        );
        assert!("profibus".parse::<Protocol>().unwrap_err().is_config());
    }

    #[test]
    fn test_descriptor_validation() {
        let tcp = DeviceTransport::Tcp {
            address: Ipv4Addr::new(10, 0, 0, 5),
            port: MODBUS_TCP_PORT,
        };
        let desc = DeviceDescriptor::new(7, Protocol::ModbusTcp, tcp.clone());
        assert!(desc.validate().is_ok());

        let desc = DeviceDescriptor::new(7, Protocol::Bacnet, tcp);
        assert!(desc.validate().is_err());

        let mut desc = DeviceDescriptor::new(
            8,
            Protocol::ModbusRtu,
            DeviceTransport::Serial(SerialSettings::default()),
        );
        assert!(desc.validate().is_ok());
        desc.transport = DeviceTransport::Serial(SerialSettings {
            stopbits: 3,
            ..SerialSettings::default()
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_parity_parsing() {
        assert_eq!("e".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("None".parse::<Parity>().unwrap(), Parity::None);
        assert!("M".parse::<Parity>().is_err());
    }
}
