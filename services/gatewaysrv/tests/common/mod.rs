//! Shared fakes for integration tests
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatewaysrv::error::{GatewaySrvError, Result};
use gatewaysrv::model::{
    DeviceDescriptor, ObjectSpec, ObjectType, PresentValue, RawReading, RawValue, ReadFailure,
    ReadOutcome,
};
use gatewaysrv::transport::{ClientFactory, DeviceClient, ResourceKey};
use gatewaysrv::upstream::{BatchUploader, UpstreamApi};

// ============================================================================
// Upstream
// ============================================================================

/// Serves fixed descriptors and object lists
#[derive(Default)]
pub struct StaticUpstream {
    devices: Mutex<HashMap<u32, (DeviceDescriptor, Vec<ObjectSpec>)>>,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl StaticUpstream {
    pub fn with_device(self, descriptor: DeviceDescriptor, specs: Vec<ObjectSpec>) -> Self {
        self.devices
            .lock()
            .insert(descriptor.device_id, (descriptor, specs));
        self
    }
}

#[async_trait]
impl UpstreamApi for StaticUpstream {
    async fn login(&self) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn device_descriptor(&self, device_id: u32) -> Result<DeviceDescriptor> {
        self.devices
            .lock()
            .get(&device_id)
            .map(|(d, _)| d.clone())
            .ok_or_else(|| GatewaySrvError::device_not_found(device_id))
    }

    async fn device_objects(
        &self,
        descriptor: &DeviceDescriptor,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSpec>> {
        Ok(self
            .devices
            .lock()
            .get(&descriptor.device_id)
            .map(|(_, specs)| {
                specs
                    .iter()
                    .filter(|s| s.key.object_type == object_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps every submitted batch
#[derive(Default)]
pub struct RecordingUploader {
    pub batches: Mutex<Vec<(u32, String)>>,
}

impl RecordingUploader {
    pub fn batches_for(&self, device_id: u32) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter(|(id, _)| *id == device_id)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

impl BatchUploader for RecordingUploader {
    fn submit(&self, device_id: u32, batch: String) {
        self.batches.lock().push((device_id, batch));
    }
}

/// Wait (real time) until `check` holds
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ============================================================================
// In-memory device
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read(u32),
    Write(u32),
}

/// Device holding one value per object id
#[derive(Debug, Default)]
pub struct MemoryClient {
    pub device_id: u32,
    pub values: Mutex<HashMap<u32, PresentValue>>,
    /// Object ids whose reads time out
    pub failing: Mutex<HashSet<u32>>,
    pub read_delay: Duration,
    pub log: Mutex<Vec<Op>>,
    pub closes: AtomicUsize,
}

impl MemoryClient {
    fn current(&self, object_id: u32) -> ReadOutcome {
        if self.failing.lock().contains(&object_id) {
            return Err(ReadFailure::Timeout);
        }
        let raw = match self.values.lock().get(&object_id) {
            Some(PresentValue::Int(v)) => RawValue::Int(*v),
            Some(PresentValue::Real(v)) => RawValue::Real(*v),
            Some(PresentValue::Text(s)) => RawValue::Text(s.clone()),
            Some(PresentValue::Null) | None => RawValue::Int(0),
        };
        Ok(RawReading::value(raw))
    }
}

#[async_trait]
impl DeviceClient for MemoryClient {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn resource(&self) -> ResourceKey {
        ResourceKey::Tcp(self.device_id)
    }

    async fn read(&self, spec: &ObjectSpec) -> ReadOutcome {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.log.lock().push(Op::Read(spec.key.object_id));
        self.current(spec.key.object_id)
    }

    async fn write_with_readback(
        &self,
        spec: &ObjectSpec,
        value: &PresentValue,
        _priority: u8,
    ) -> Result<ReadOutcome> {
        self.log.lock().push(Op::Write(spec.key.object_id));
        self.values
            .lock()
            .insert(spec.key.object_id, value.clone());
        Ok(self.current(spec.key.object_id))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one [`MemoryClient`] per device
#[derive(Default)]
pub struct MemoryFactory {
    pub read_delay: Duration,
    pub clients: Mutex<HashMap<u32, Arc<MemoryClient>>>,
    pub close_all_calls: AtomicUsize,
}

impl MemoryFactory {
    pub fn client(&self, device_id: u32) -> Arc<MemoryClient> {
        self.clients
            .lock()
            .entry(device_id)
            .or_insert_with(|| {
                Arc::new(MemoryClient {
                    device_id,
                    read_delay: self.read_delay,
                    ..Default::default()
                })
            })
            .clone()
    }
}

#[async_trait]
impl ClientFactory for MemoryFactory {
    async fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn DeviceClient>> {
        Ok(self.client(descriptor.device_id))
    }

    async fn close_all(&self) {
        self.close_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}
