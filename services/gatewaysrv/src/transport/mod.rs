//! Transport clients
//!
//! One client per physical resource: a Modbus TCP connection per device, a
//! Modbus RTU client per serial port and a BACnet endpoint per local
//! interface. Devices on a shared resource serialise on its mutex.

pub mod bacnet_device;
pub mod client;
pub mod modbus_device;
pub mod registry;

pub use bacnet_device::BacnetDevice;
pub use client::{ClientFactory, DeviceClient, ResourceKey};
pub use modbus_device::ModbusDevice;
pub use registry::{ResourceRegistry, SharedResource};

use async_trait::async_trait;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{GatewaySrvError, Result};
use crate::model::{DeviceDescriptor, DeviceTransport, Protocol};
use crate::protocols::bacnet::{select_interface, BacnetEndpoint};
use crate::protocols::modbus::{Framing, ModbusClient, ModbusEndpoint};

/// Factory backed by the process-wide [`ResourceRegistry`]
#[derive(Debug, Default)]
pub struct TransportFactory {
    registry: Arc<ResourceRegistry>,
}

impl TransportFactory {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    async fn create_modbus(
        &self,
        descriptor: &DeviceDescriptor,
        key: ResourceKey,
        endpoint: ModbusEndpoint,
        framing: Framing,
    ) -> Result<Arc<dyn DeviceClient>> {
        let connect_timeout = descriptor.apdu_timeout;
        let client = self.registry.modbus(key.clone(), || {
            ModbusClient::new(endpoint.clone(), framing, connect_timeout)
        })?;

        {
            let mut guard = client.lock().await;
            if guard.endpoint() != &endpoint || guard.framing() != framing {
                warn!(
                    "Device {} wants {} ({:?}) but {} is open as {} ({:?})",
                    descriptor.device_id,
                    endpoint,
                    framing,
                    key,
                    guard.endpoint(),
                    guard.framing()
                );
            }
            guard.connect().await?;
        }

        Ok(Arc::new(ModbusDevice::new(
            descriptor.device_id,
            descriptor.unit,
            key,
            client,
            descriptor.apdu_timeout,
            descriptor.retries,
        )))
    }

    async fn create_bacnet(
        &self,
        descriptor: &DeviceDescriptor,
        peer: SocketAddrV4,
    ) -> Result<Arc<dyn DeviceClient>> {
        let interface = select_interface(*peer.ip());
        let key = ResourceKey::BacnetInterface(interface);
        let endpoint = self
            .registry
            .bacnet(key.clone(), || BacnetEndpoint::new(interface))?;
        endpoint.lock().await.open().await?;

        Ok(Arc::new(BacnetDevice::new(
            descriptor.device_id,
            peer,
            key,
            endpoint,
            descriptor.apdu_timeout,
            descriptor.retries,
        )))
    }
}

#[async_trait]
impl ClientFactory for TransportFactory {
    async fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn DeviceClient>> {
        descriptor.validate()?;

        let client = match (descriptor.protocol, &descriptor.transport) {
            (Protocol::ModbusTcp, DeviceTransport::Tcp { address, port }) => {
                self.create_modbus(
                    descriptor,
                    ResourceKey::Tcp(descriptor.device_id),
                    ModbusEndpoint::Tcp(SocketAddrV4::new(*address, *port)),
                    Framing::Tcp,
                )
                .await?
            },
            (Protocol::ModbusRtuOverTcp, DeviceTransport::Tcp { address, port }) => {
                self.create_modbus(
                    descriptor,
                    ResourceKey::Tcp(descriptor.device_id),
                    ModbusEndpoint::Tcp(SocketAddrV4::new(*address, *port)),
                    Framing::Rtu,
                )
                .await?
            },
            (Protocol::ModbusRtu, DeviceTransport::Serial(settings)) => {
                self.create_modbus(
                    descriptor,
                    ResourceKey::Serial(settings.port.clone()),
                    ModbusEndpoint::Serial(settings.clone()),
                    Framing::Rtu,
                )
                .await?
            },
            (Protocol::Bacnet, DeviceTransport::Bacnet { address, port }) => {
                self.create_bacnet(descriptor, SocketAddrV4::new(*address, *port))
                    .await?
            },
            (protocol, _) => {
                return Err(GatewaySrvError::config(format!(
                    "Device {}: no transport for protocol {}",
                    descriptor.device_id, protocol
                )));
            },
        };

        info!(
            "Device {} ({}) bound to {}",
            descriptor.device_id,
            descriptor.protocol,
            client.resource()
        );
        Ok(client)
    }

    async fn close_all(&self) {
        self.registry.close_all().await;
    }
}
