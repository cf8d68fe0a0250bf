//! Device client abstractions
//!
//! A [`DeviceClient`] is the per-device view of a transport. Devices sharing
//! a physical resource (serial port, BACnet interface) hold clients that
//! point at the same locked handle.

use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{DeviceDescriptor, ObjectSpec, PresentValue, ReadOutcome};

/// Identity of a physical resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    /// Serial port name, shared by every RTU device on it
    Serial(String),
    /// Modbus TCP / RTU-over-TCP connection of one device
    Tcp(u32),
    /// Local IPv4 interface used for BACnet/IP
    BacnetInterface(Ipv4Addr),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(port) => write!(f, "serial:{}", port),
            Self::Tcp(device_id) => write!(f, "tcp:device-{}", device_id),
            Self::BacnetInterface(ip) => write!(f, "bacnet:{}", ip),
        }
    }
}

/// Per-device transport client
///
/// Every call holds the resource mutex for its whole duration, so at most
/// one request is in flight per physical resource.
#[async_trait]
pub trait DeviceClient: Send + Sync + fmt::Debug {
    fn device_id(&self) -> u32;

    fn resource(&self) -> ResourceKey;

    /// Read one object; failures are returned as data
    async fn read(&self, spec: &ObjectSpec) -> ReadOutcome;

    /// Write `value` and read the object back under the same lock
    ///
    /// `Err` means the write itself did not go through; the readback
    /// outcome is returned as data.
    async fn write_with_readback(
        &self,
        spec: &ObjectSpec,
        value: &PresentValue,
        priority: u8,
    ) -> Result<ReadOutcome>;

    /// Release per-device state; shared resources stay open
    async fn close(&self);
}

/// Creates device clients and owns the shared resources behind them
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create (and connect) the client for a device
    async fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn DeviceClient>>;

    /// Close every shared resource exactly once
    async fn close_all(&self);
}
