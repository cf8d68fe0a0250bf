//! Process-wide registry of shared physical resources
//!
//! Resources are created lazily by the first device that needs them and are
//! only torn down by [`ResourceRegistry::close_all`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::client::ResourceKey;
use crate::error::{GatewaySrvError, Result};
use crate::protocols::bacnet::BacnetEndpoint;
use crate::protocols::modbus::ModbusClient;

/// Shared client handle together with its lock
#[derive(Debug, Clone)]
pub enum SharedResource {
    Modbus(Arc<AsyncMutex<ModbusClient>>),
    Bacnet(Arc<AsyncMutex<BacnetEndpoint>>),
}

impl SharedResource {
    async fn close(&self) {
        match self {
            Self::Modbus(client) => client.lock().await.close().await,
            Self::Bacnet(endpoint) => endpoint.lock().await.close().await,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Mutex<HashMap<ResourceKey, SharedResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modbus client for `key`, created with `make` on first use
    pub fn modbus(
        &self,
        key: ResourceKey,
        make: impl FnOnce() -> ModbusClient,
    ) -> Result<Arc<AsyncMutex<ModbusClient>>> {
        let mut resources = self.resources.lock();
        let entry = resources.entry(key.clone()).or_insert_with(|| {
            debug!("Creating shared Modbus resource {}", key);
            SharedResource::Modbus(Arc::new(AsyncMutex::new(make())))
        });
        match entry {
            SharedResource::Modbus(client) => Ok(client.clone()),
            SharedResource::Bacnet(_) => Err(GatewaySrvError::resource(format!(
                "Resource {} is not a Modbus client",
                key
            ))),
        }
    }

    /// BACnet endpoint for `key`, created with `make` on first use
    pub fn bacnet(
        &self,
        key: ResourceKey,
        make: impl FnOnce() -> BacnetEndpoint,
    ) -> Result<Arc<AsyncMutex<BacnetEndpoint>>> {
        let mut resources = self.resources.lock();
        let entry = resources.entry(key.clone()).or_insert_with(|| {
            debug!("Creating shared BACnet resource {}", key);
            SharedResource::Bacnet(Arc::new(AsyncMutex::new(make())))
        });
        match entry {
            SharedResource::Bacnet(endpoint) => Ok(endpoint.clone()),
            SharedResource::Modbus(_) => Err(GatewaySrvError::resource(format!(
                "Resource {} is not a BACnet endpoint",
                key
            ))),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<SharedResource> {
        self.resources.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.resources.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    /// Close and forget every resource; returns how many were closed
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ResourceKey, SharedResource)> =
            std::mem::take(&mut *self.resources.lock()).into_iter().collect();

        for (key, resource) in &drained {
            debug!("Closing shared resource {}", key);
            resource.close().await;
        }
        if !drained.is_empty() {
            info!("Closed {} shared resources", drained.len());
        }
        drained.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::SerialSettings;
    use crate::protocols::modbus::{Framing, ModbusEndpoint};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn serial_client() -> ModbusClient {
        ModbusClient::new(
            ModbusEndpoint::Serial(SerialSettings::default()),
            Framing::Rtu,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_same_key_shares_handle() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::Serial("/dev/ttyUSB0".into());

        let a = registry.modbus(key.clone(), serial_client).unwrap();
        let b = registry
            .modbus(key, || panic!("must not create a second client"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_error() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::BacnetInterface(Ipv4Addr::LOCALHOST);
        registry
            .bacnet(key.clone(), || BacnetEndpoint::new(Ipv4Addr::LOCALHOST))
            .unwrap();
        let err = registry.modbus(key, serial_client).unwrap_err();
        assert!(matches!(err, GatewaySrvError::ResourceError(_)));
    }

    #[tokio::test]
    async fn test_close_all_drains_once() {
        let registry = ResourceRegistry::new();
        registry
            .modbus(ResourceKey::Tcp(1), serial_client)
            .unwrap();
        registry
            .bacnet(ResourceKey::BacnetInterface(Ipv4Addr::LOCALHOST), || {
                BacnetEndpoint::new(Ipv4Addr::LOCALHOST)
            })
            .unwrap();

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_empty());
        assert_eq!(registry.close_all().await, 0);
    }
}
