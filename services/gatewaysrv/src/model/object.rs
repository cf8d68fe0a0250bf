//! Polled objects: static description plus mutable verified state

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::modbus::ModbusPoint;
use super::object_type::ObjectType;
use super::status_flags::{StatusFlag, StatusFlags};
use super::value::{PresentValue, PriorityArray, RawValue};
use crate::error::{GatewaySrvError, Result};

/// Resolution applied to analog objects that do not declare one
pub const DEFAULT_RESOLUTION: f64 = 0.1;

/// Engine-wide unique identity of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub device_id: u32,
    pub object_type: ObjectType,
    pub object_id: u32,
}

impl ObjectKey {
    pub fn new(device_id: u32, object_type: ObjectType, object_id: u32) -> Self {
        Self {
            device_id,
            object_type,
            object_id,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.device_id,
            self.object_type.id(),
            self.object_id
        )
    }
}

/// How the object is reached on the field bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ObjectAddressing {
    Modbus(ModbusPoint),
    /// BACnet objects are addressed by their identifier alone
    Bacnet,
}

/// Static description of a polled object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub key: ObjectKey,
    pub name: String,
    pub resolution: f64,
    pub poll_period: Option<Duration>,
    pub send_period: Option<Duration>,
    pub addressing: ObjectAddressing,
}

impl ObjectSpec {
    pub fn bacnet(key: ObjectKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            resolution: DEFAULT_RESOLUTION,
            poll_period: None,
            send_period: None,
            addressing: ObjectAddressing::Bacnet,
        }
    }

    pub fn modbus(key: ObjectKey, name: impl Into<String>, point: ModbusPoint) -> Self {
        Self {
            addressing: ObjectAddressing::Modbus(point),
            ..Self::bacnet(key, name)
        }
    }

    pub fn modbus_point(&self) -> Option<&ModbusPoint> {
        match &self.addressing {
            ObjectAddressing::Modbus(point) => Some(point),
            ObjectAddressing::Bacnet => None,
        }
    }

    /// Poll period override, falling back to the device default
    pub fn effective_poll_period(&self, device_default: Duration) -> Duration {
        self.poll_period.unwrap_or(device_default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.object_type.is_analog()
            && (self.resolution.is_nan() || self.resolution <= 0.0)
        {
            return Err(GatewaySrvError::config(format!(
                "Object {}: resolution must be strictly positive",
                self.key
            )));
        }
        if matches!(self.poll_period, Some(p) if p.is_zero()) {
            return Err(GatewaySrvError::config(format!(
                "Object {}: pollPeriod must be greater than zero",
                self.key
            )));
        }
        if let Some(point) = self.modbus_point() {
            point
                .validate()
                .map_err(|e| GatewaySrvError::config(format!("Object {}: {}", self.key, e)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Raw readings and failures
// ============================================================================

/// Successful reading before verification
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub value: RawValue,
    /// Device-reported flags (BACnet); Modbus readings carry none
    pub status_flags: Option<StatusFlags>,
    pub priority_array: Option<PriorityArray>,
    pub reliability: Option<String>,
}

impl RawReading {
    pub fn value(value: RawValue) -> Self {
        Self {
            value,
            status_flags: None,
            priority_array: None,
            reliability: None,
        }
    }
}

/// Why a read produced no value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadFailure {
    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("object does not exist on the device")]
    UnknownObject,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{kind}: {message}")]
    Other { kind: String, message: String },
}

impl ReadFailure {
    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Reliability tag recorded on the object
    pub fn reliability(&self) -> String {
        match self {
            Self::Timeout | Self::Cancelled => "timeout".to_string(),
            Self::UnknownObject => "non-existent-object".to_string(),
            Self::Decode(_) => "decode-error".to_string(),
            Self::Other { kind, .. } => sanitize_kind(kind),
        }
    }
}

impl From<GatewaySrvError> for ReadFailure {
    fn from(err: GatewaySrvError) -> Self {
        match err {
            GatewaySrvError::TimeoutError(_) => Self::Timeout,
            GatewaySrvError::DataError(msg) => Self::Decode(msg),
            other => Self::Other {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Lowercase, non-alphanumerics replaced by '-'
fn sanitize_kind(kind: &str) -> String {
    kind.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

pub type ReadOutcome = std::result::Result<RawReading, ReadFailure>;

// ============================================================================
// Mutable state
// ============================================================================

/// Verified state of an object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub present_value: PresentValue,
    pub status_flags: StatusFlags,
    pub reliability: Option<String>,
    pub priority_array: Option<PriorityArray>,
    pub updated_at: Option<DateTime<Utc>>,
    pub changed_at: Option<DateTime<Utc>>,
    pub unreachable_in_row: u32,
    pub exists: bool,
    /// Raw outcome of the latest read, consumed by the verifier
    pub pending: Option<ReadOutcome>,
}

impl Default for ObjectState {
    fn default() -> Self {
        Self {
            present_value: PresentValue::Null,
            status_flags: StatusFlags::default().enable(StatusFlag::Fault),
            reliability: None,
            priority_array: None,
            updated_at: None,
            changed_at: None,
            unreachable_in_row: 0,
            exists: true,
            pending: None,
        }
    }
}

/// Serializable view of an object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSnapshot {
    pub device_id: u32,
    pub object_type: u16,
    pub object_id: u32,
    pub name: String,
    pub present_value: PresentValue,
    pub status_flags: u8,
    pub reliability: Option<String>,
    pub priority_array: Option<PriorityArray>,
    pub updated_at: Option<DateTime<Utc>>,
    pub changed_at: Option<DateTime<Utc>>,
    pub unreachable_in_row: u32,
    pub exists: bool,
}

/// An object under polling
#[derive(Debug)]
pub struct PolledObject {
    spec: ObjectSpec,
    state: RwLock<ObjectState>,
}

impl PolledObject {
    pub fn new(spec: ObjectSpec) -> Self {
        Self {
            spec,
            state: RwLock::new(ObjectState::default()),
        }
    }

    #[inline]
    pub fn key(&self) -> ObjectKey {
        self.spec.key
    }

    #[inline]
    pub fn spec(&self) -> &ObjectSpec {
        &self.spec
    }

    /// Copy of the current state
    pub fn state(&self) -> ObjectState {
        self.state.read().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        f(&mut self.state.write())
    }

    pub fn exists(&self) -> bool {
        self.state.read().exists
    }

    pub fn unreachable_in_row(&self) -> u32 {
        self.state.read().unreachable_in_row
    }

    /// Commit the raw outcome of a read
    pub fn record(&self, outcome: ReadOutcome) {
        let mut state = self.state.write();
        state.updated_at = Some(Utc::now());
        match &outcome {
            Ok(_) => state.unreachable_in_row = 0,
            Err(failure) => {
                state.unreachable_in_row = state.unreachable_in_row.saturating_add(1);
                if *failure == ReadFailure::UnknownObject {
                    state.exists = false;
                }
            },
        }
        state.pending = Some(outcome);
    }

    pub fn snapshot(&self) -> ObjectSnapshot {
        let state = self.state.read();
        ObjectSnapshot {
            device_id: self.spec.key.device_id,
            object_type: self.spec.key.object_type.id(),
            object_id: self.spec.key.object_id,
            name: self.spec.name.clone(),
            present_value: state.present_value.clone(),
            status_flags: state.status_flags.flags(),
            reliability: state.reliability.clone(),
            priority_array: state.priority_array.clone(),
            updated_at: state.updated_at,
            changed_at: state.changed_at,
            unreachable_in_row: state.unreachable_in_row,
            exists: state.exists,
        }
    }
}
