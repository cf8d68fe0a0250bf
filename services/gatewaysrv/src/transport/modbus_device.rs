//! Modbus device client
//!
//! Wraps a (possibly shared) [`ModbusClient`] with the device's unit
//! address, request timeout and retry count.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::client::{DeviceClient, ResourceKey};
use crate::error::{GatewaySrvError, Result};
use crate::model::{
    ModbusPoint, ObjectSpec, PresentValue, RawReading, RawValue, ReadFailure, ReadOutcome,
};
use crate::protocols::modbus::{payload, ModbusClient};

#[derive(Debug)]
pub struct ModbusDevice {
    device_id: u32,
    unit: u8,
    resource: ResourceKey,
    client: Arc<Mutex<ModbusClient>>,
    request_timeout: Duration,
    retries: u32,
}

impl ModbusDevice {
    pub fn new(
        device_id: u32,
        unit: u8,
        resource: ResourceKey,
        client: Arc<Mutex<ModbusClient>>,
        request_timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            device_id,
            unit,
            resource,
            client,
            request_timeout,
            retries,
        }
    }

    fn point<'a>(&self, spec: &'a ObjectSpec) -> Result<&'a ModbusPoint> {
        spec.modbus_point().ok_or_else(|| {
            GatewaySrvError::validation(format!("Object {} has no Modbus addressing", spec.key))
        })
    }

    /// Read and decode one point; the caller holds the client lock
    async fn read_locked(&self, client: &mut ModbusClient, point: &ModbusPoint) -> Result<RawValue> {
        let mut attempt = 0;
        let response = loop {
            match client
                .read(
                    self.unit,
                    point.function_read,
                    point.address,
                    point.quantity,
                    self.request_timeout,
                )
                .await
            {
                Ok(response) => break response,
                Err(GatewaySrvError::TimeoutError(msg)) if attempt < self.retries => {
                    attempt += 1;
                    debug!(
                        "Device {} read at {} timed out ({}), retry {}/{}",
                        self.device_id, point.address, msg, attempt, self.retries
                    );
                },
                Err(e) => return Err(e),
            }
        };
        payload::decode(point, &response)
    }
}

#[async_trait]
impl DeviceClient for ModbusDevice {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn resource(&self) -> ResourceKey {
        self.resource.clone()
    }

    async fn read(&self, spec: &ObjectSpec) -> ReadOutcome {
        let point = self.point(spec).map_err(ReadFailure::from)?;
        let mut client = self.client.lock().await;
        self.read_locked(&mut client, point)
            .await
            .map(RawReading::value)
            .map_err(ReadFailure::from)
    }

    async fn write_with_readback(
        &self,
        spec: &ObjectSpec,
        value: &PresentValue,
        _priority: u8,
    ) -> Result<ReadOutcome> {
        let point = self.point(spec)?;
        let payload = payload::encode(point, value)?;
        let fc = point.function_write.ok_or_else(|| {
            GatewaySrvError::validation(format!("Object {} is not writable", spec.key))
        })?;

        let mut client = self.client.lock().await;
        let mut attempt = 0;
        loop {
            match client
                .write(self.unit, fc, point.address, &payload, self.request_timeout)
                .await
            {
                Ok(()) => break,
                Err(GatewaySrvError::TimeoutError(msg)) if attempt < self.retries => {
                    attempt += 1;
                    debug!(
                        "Device {} write at {} timed out ({}), retry {}/{}",
                        self.device_id, point.address, msg, attempt, self.retries
                    );
                },
                Err(e) => return Err(e),
            }
        }
        debug!("Device {} wrote {} to {}", self.device_id, value, spec.key);

        Ok(self
            .read_locked(&mut client, point)
            .await
            .map(RawReading::value)
            .map_err(ReadFailure::from))
    }

    async fn close(&self) {
        debug!("Device {} released {}", self.device_id, self.resource);
    }
}
