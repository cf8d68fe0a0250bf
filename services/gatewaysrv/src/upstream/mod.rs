//! Upstream collaborators
//!
//! The building-automation server (descriptors, object lists, batch
//! upload) and the MQTT broker. The engine talks to them through the
//! traits below.

pub mod descriptor;
pub mod http;
pub mod mqtt;

pub use http::{HttpUpstream, HttpUpstreamConfig};
pub use mqtt::{MqttBridge, MqttConfig};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DeviceDescriptor, ObjectSpec, ObjectType};

/// Source of device descriptors and object lists
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn login(&self) -> Result<()>;

    async fn device_descriptor(&self, device_id: u32) -> Result<DeviceDescriptor>;

    async fn device_objects(
        &self,
        descriptor: &DeviceDescriptor,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSpec>>;

    async fn logout(&self) -> Result<()>;
}

/// Fire-and-forget sink for serialised device batches
pub trait BatchUploader: Send + Sync {
    fn submit(&self, device_id: u32, batch: String);
}

/// Sink for per-object payloads
#[async_trait]
pub trait ObjectPublisher: Send + Sync {
    async fn publish(&self, payload: String);
}
