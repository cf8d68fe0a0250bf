//! BACnet/IP device client
//!
//! Objects are read property by property over their canonical property
//! set; reliability is fetched only when the device reports a non-clear
//! status.

use async_trait::async_trait;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::client::{DeviceClient, ResourceKey};
use crate::error::{GatewaySrvError, Result};
use crate::model::{
    ObjectSpec, ObjectType, PresentValue, PriorityArray, PropertyId, RawReading, RawValue,
    ReadFailure, ReadOutcome, StatusFlags, PRIORITY_LEVELS,
};
use crate::protocols::bacnet::{BacnetEndpoint, BacnetValue, ObjectId, ServiceError};

const NO_FAULT_DETECTED: &str = "no-fault-detected";

#[derive(Debug)]
pub struct BacnetDevice {
    device_id: u32,
    peer: SocketAddrV4,
    resource: ResourceKey,
    endpoint: Arc<Mutex<BacnetEndpoint>>,
    request_timeout: Duration,
    retries: u32,
}

impl BacnetDevice {
    pub fn new(
        device_id: u32,
        peer: SocketAddrV4,
        resource: ResourceKey,
        endpoint: Arc<Mutex<BacnetEndpoint>>,
        request_timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            device_id,
            peer,
            resource,
            endpoint,
            request_timeout,
            retries,
        }
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Read the canonical properties; the caller holds the endpoint lock
    async fn read_locked(&self, endpoint: &mut BacnetEndpoint, spec: &ObjectSpec) -> ReadOutcome {
        let object = object_id(spec);
        let mut reading = RawReading::value(RawValue::Null);
        let mut have_value = false;

        for property in spec.key.object_type.canonical_properties() {
            let values = match self.read_property(endpoint, object, *property).await? {
                Ok(values) => values,
                Err(err) if err.is_unknown_object() => return Err(ReadFailure::UnknownObject),
                Err(err) if err.is_unknown_property() && *property != PropertyId::PresentValue => {
                    trace!("{} has no {}", spec.key, property.token());
                    continue;
                },
                Err(err) => return Err(service_failure(&err)),
            };

            match property {
                PropertyId::PresentValue | PropertyId::ObjectIdentifier => {
                    if !have_value {
                        reading.value = first_value(&values)?;
                        have_value = true;
                    }
                },
                PropertyId::StatusFlags => reading.status_flags = Some(status_flags(&values)?),
                PropertyId::PriorityArray => {
                    reading.priority_array = Some(priority_array(&values))
                },
                _ => {},
            }
        }

        if !have_value {
            return Err(ReadFailure::Decode(format!(
                "{}: no present value in reply",
                spec.key
            )));
        }

        if reading.status_flags.is_some_and(|flags| !flags.is_clear()) {
            if let Ok(values) = self
                .read_property(endpoint, object, PropertyId::Reliability)
                .await?
            {
                reading.reliability = values.first().and_then(reliability_tag);
            }
        }

        Ok(reading)
    }

    async fn read_property(
        &self,
        endpoint: &mut BacnetEndpoint,
        object: ObjectId,
        property: PropertyId,
    ) -> std::result::Result<std::result::Result<Vec<BacnetValue>, ServiceError>, ReadFailure> {
        endpoint
            .read_property(
                self.peer,
                object,
                property.id(),
                self.request_timeout,
                self.retries,
            )
            .await
            .map_err(ReadFailure::from)
    }
}

#[async_trait]
impl DeviceClient for BacnetDevice {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn resource(&self) -> ResourceKey {
        self.resource.clone()
    }

    async fn read(&self, spec: &ObjectSpec) -> ReadOutcome {
        let mut endpoint = self.endpoint.lock().await;
        self.read_locked(&mut endpoint, spec).await
    }

    async fn write_with_readback(
        &self,
        spec: &ObjectSpec,
        value: &PresentValue,
        priority: u8,
    ) -> Result<ReadOutcome> {
        let object_type = spec.key.object_type;
        let bacnet_value = to_bacnet(object_type, value)?;
        let priority = if object_type.has_priority_array() {
            if !(1..=PRIORITY_LEVELS as u8).contains(&priority) {
                return Err(GatewaySrvError::validation(format!(
                    "Priority {} outside 1..=16",
                    priority
                )));
            }
            Some(priority)
        } else {
            None
        };

        let mut endpoint = self.endpoint.lock().await;
        endpoint
            .write_property(
                self.peer,
                object_id(spec),
                PropertyId::PresentValue.id(),
                &bacnet_value,
                priority,
                self.request_timeout,
                self.retries,
            )
            .await?
            .map_err(|err| {
                GatewaySrvError::protocol(format!("WriteProperty on {} refused: {}", spec.key, err))
            })?;
        debug!(
            "Device {} wrote {} to {} at priority {:?}",
            self.device_id, value, spec.key, priority
        );

        Ok(self.read_locked(&mut endpoint, spec).await)
    }

    async fn close(&self) {
        debug!("Device {} released {}", self.device_id, self.resource);
    }
}

fn object_id(spec: &ObjectSpec) -> ObjectId {
    ObjectId::new(spec.key.object_type.id(), spec.key.object_id)
}

fn service_failure(err: &ServiceError) -> ReadFailure {
    let kind = match err {
        ServiceError::Error { .. } => "bacnet-error",
        ServiceError::Reject(_) => "bacnet-reject",
        ServiceError::Abort(_) => "bacnet-abort",
    };
    ReadFailure::other(kind, err.to_string())
}

fn raw_value(value: &BacnetValue) -> RawValue {
    match value {
        BacnetValue::Null => RawValue::Null,
        BacnetValue::Boolean(b) => RawValue::Bool(*b),
        BacnetValue::Unsigned(v) => RawValue::Int(*v as i64),
        BacnetValue::Signed(v) => RawValue::Int(*v),
        BacnetValue::Real(v) => RawValue::Real(f64::from(*v)),
        BacnetValue::Double(v) => RawValue::Real(*v),
        BacnetValue::Enumerated(v) => RawValue::Int(i64::from(*v)),
        BacnetValue::CharacterString(s) => RawValue::Text(s.clone()),
        BacnetValue::ObjectId(id) => RawValue::Int(i64::from(id.instance)),
        other => RawValue::Text(format!("{:?}", other)),
    }
}

fn first_value(values: &[BacnetValue]) -> std::result::Result<RawValue, ReadFailure> {
    values
        .first()
        .map(raw_value)
        .ok_or_else(|| ReadFailure::Decode("empty property value".to_string()))
}

fn status_flags(values: &[BacnetValue]) -> std::result::Result<StatusFlags, ReadFailure> {
    match values.first() {
        Some(BacnetValue::BitString(bits)) => Ok(StatusFlags::from_bits(bits)),
        other => Err(ReadFailure::Decode(format!(
            "status-flags is not a bit string: {:?}",
            other
        ))),
    }
}

fn priority_array(values: &[BacnetValue]) -> PriorityArray {
    PriorityArray::from_slots(values.iter().map(|v| match raw_value(v) {
        RawValue::Null => None,
        RawValue::Bool(b) => Some(PresentValue::Int(i64::from(b))),
        RawValue::Int(i) => Some(PresentValue::Int(i)),
        RawValue::Real(r) => Some(PresentValue::Real(r)),
        RawValue::Text(s) => Some(PresentValue::Text(s)),
    }))
}

fn reliability_tag(value: &BacnetValue) -> Option<String> {
    match value {
        BacnetValue::Enumerated(0) => Some(NO_FAULT_DETECTED.to_string()),
        BacnetValue::Enumerated(code) => Some(code.to_string()),
        BacnetValue::CharacterString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Map a present value onto the application tag the object type expects
fn to_bacnet(object_type: ObjectType, value: &PresentValue) -> Result<BacnetValue> {
    if value.is_null() {
        return Ok(BacnetValue::Null);
    }
    let number = value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GatewaySrvError::data(format!("Cannot write {} to BACnet", value)))?;

    if object_type.is_analog() {
        Ok(BacnetValue::Real(number as f32))
    } else if object_type.is_binary() {
        Ok(BacnetValue::Enumerated(u32::from(number != 0.0)))
    } else if object_type.is_discrete() {
        if number < 1.0 || number.fract() != 0.0 || number > f64::from(u32::MAX) {
            return Err(GatewaySrvError::data(format!(
                "Invalid multi-state value {}",
                value
            )));
        }
        Ok(BacnetValue::Unsigned(number as u64))
    } else {
        Err(GatewaySrvError::validation(format!(
            "Object type {} is not writable",
            object_type
        )))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::{ObjectKey, StatusFlag};
    use crate::protocols::bacnet::apdu::{
        self, confirmed_service, ERROR_CLASS_OBJECT, ERROR_CLASS_PROPERTY,
        ERROR_CODE_UNKNOWN_OBJECT, ERROR_CODE_UNKNOWN_PROPERTY,
    };
    use std::net::{Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    /// Fake device: AV1 is commandable with a fault, AI2 has no
    /// reliability, everything else is unknown. Writes land in AV1's
    /// present value.
    async fn fake_device() -> SocketAddrV4 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        tokio::spawn(async move {
            let mut present = 21.5f32;
            let mut buf = [0u8; 1500];
            loop {
                let (n, from) = socket.recv_from(&mut buf).await.unwrap();
                let req = apdu::decode_request(&buf[..n]).unwrap();
                let known = matches!(
                    (req.object.object_type, req.object.instance),
                    (2, 1) | (0, 2)
                );
                let reply = if !known {
                    apdu::encode_error(
                        req.invoke_id,
                        req.service,
                        ERROR_CLASS_OBJECT,
                        ERROR_CODE_UNKNOWN_OBJECT,
                    )
                } else if req.service == confirmed_service::WRITE_PROPERTY {
                    if let Some(BacnetValue::Real(v)) = req.value {
                        present = v;
                    }
                    apdu::encode_simple_ack(req.invoke_id, req.service)
                } else {
                    let values = match req.property {
                        85 => vec![BacnetValue::Real(present)],
                        111 if req.object.instance == 1 => {
                            vec![BacnetValue::BitString(vec![false, true, false, false])]
                        },
                        111 => vec![BacnetValue::BitString(vec![false; 4])],
                        87 => {
                            let mut slots = vec![BacnetValue::Null; 16];
                            slots[10] = BacnetValue::Real(present);
                            slots
                        },
                        103 => vec![BacnetValue::Enumerated(7)],
                        _ => Vec::new(),
                    };
                    if values.is_empty() {
                        apdu::encode_error(
                            req.invoke_id,
                            req.service,
                            ERROR_CLASS_PROPERTY,
                            ERROR_CODE_UNKNOWN_PROPERTY,
                        )
                    } else {
                        apdu::encode_read_ack(req.invoke_id, req.object, req.property, &values)
                    }
                };
                socket.send_to(&reply, from).await.unwrap();
            }
        });
        addr
    }

    fn device(peer: SocketAddrV4) -> BacnetDevice {
        BacnetDevice::new(
            5,
            peer,
            ResourceKey::BacnetInterface(Ipv4Addr::LOCALHOST),
            Arc::new(Mutex::new(BacnetEndpoint::new(Ipv4Addr::LOCALHOST))),
            Duration::from_millis(500),
            0,
        )
    }

    #[tokio::test]
    async fn test_read_commandable_object() {
        let dev = device(fake_device().await);
        let spec = ObjectSpec::bacnet(ObjectKey::new(5, ObjectType::AnalogValue, 1), "AV1");

        let reading = dev.read(&spec).await.unwrap();
        assert_eq!(reading.value, RawValue::Real(21.5));
        assert!(reading.status_flags.unwrap().check(StatusFlag::Fault));
        assert_eq!(
            reading.priority_array.unwrap().get(10),
            Some(&PresentValue::Real(21.5))
        );
        assert_eq!(reading.reliability.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_read_input_skips_priority_array() {
        let dev = device(fake_device().await);
        let spec = ObjectSpec::bacnet(ObjectKey::new(5, ObjectType::AnalogInput, 2), "AI2");

        let reading = dev.read(&spec).await.unwrap();
        assert!(reading.priority_array.is_none());
        assert_eq!(reading.status_flags, Some(StatusFlags::new(0)));
        assert!(reading.reliability.is_none());
    }

    #[tokio::test]
    async fn test_unknown_object() {
        let dev = device(fake_device().await);
        let spec = ObjectSpec::bacnet(ObjectKey::new(5, ObjectType::BinaryInput, 9), "BI9");
        assert_eq!(dev.read(&spec).await, Err(ReadFailure::UnknownObject));
    }

    #[tokio::test]
    async fn test_write_with_readback() {
        let dev = device(fake_device().await);
        let spec = ObjectSpec::bacnet(ObjectKey::new(5, ObjectType::AnalogValue, 1), "AV1");

        let outcome = dev
            .write_with_readback(&spec, &PresentValue::Int(7), 11)
            .await
            .unwrap();
        assert_eq!(outcome.unwrap().value, RawValue::Real(7.0));

        let err = dev
            .write_with_readback(&spec, &PresentValue::Int(7), 17)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewaySrvError::ValidationError(_)));
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(
            to_bacnet(ObjectType::BinaryOutput, &PresentValue::Int(1)).unwrap(),
            BacnetValue::Enumerated(1)
        );
        assert_eq!(
            to_bacnet(ObjectType::MultiStateValue, &PresentValue::Int(3)).unwrap(),
            BacnetValue::Unsigned(3)
        );
        assert_eq!(
            to_bacnet(ObjectType::AnalogOutput, &PresentValue::Null).unwrap(),
            BacnetValue::Null
        );
        assert!(to_bacnet(ObjectType::MultiStateValue, &PresentValue::Int(0)).is_err());
        assert!(to_bacnet(ObjectType::AnalogValue, &PresentValue::Text("x".into())).is_err());
        assert_eq!(
            reliability_tag(&BacnetValue::Enumerated(0)).as_deref(),
            Some("no-fault-detected")
        );
    }
}
