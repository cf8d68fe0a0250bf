//! Serialiser / egress bridge
//!
//! Per-object wire line: `<id> <type> <pv> [<priority-array>] <flags> [<reliability>]`,
//! lines joined with a trailing `;`. MQTT payload:
//! `<device-id> <id> <type> <pv> <flags>`.

use std::sync::Arc;
use tracing::debug;

use crate::model::{ObjectState, PolledObject, PriorityArray, StatusFlag, StatusFlags};
use crate::upstream::{BatchUploader, ObjectPublisher};

const NO_FAULT_DETECTED: &str = "no-fault-detected";

/// Stored flags with FAULT forced for a null value and OVERRIDEN
/// re-derived from the priority array
pub fn effective_status_flags(state: &ObjectState, override_threshold: u8) -> StatusFlags {
    let mut flags = state.status_flags;
    if state.present_value.is_null() {
        flags.set(StatusFlag::Fault, true);
    }
    if let Some(pa) = &state.priority_array {
        flags.set(
            StatusFlag::Overriden,
            pa.any_at_or_above_level(override_threshold),
        );
    }
    flags
}

/// Wire line of one object (without the `;` terminator)
pub fn object_line(obj: &PolledObject, override_threshold: u8) -> String {
    let key = obj.key();
    let state = obj.state();
    let mut fields = vec![
        key.object_id.to_string(),
        key.object_type.id().to_string(),
        state.present_value.to_string(),
    ];

    if key.object_type.has_priority_array() {
        let pa = match &state.priority_array {
            Some(pa) => pa.to_string(),
            None => PriorityArray::empty().to_string(),
        };
        fields.push(pa);
    }

    fields.push(effective_status_flags(&state, override_threshold).to_string());

    if let Some(reliability) = state
        .reliability
        .as_deref()
        .filter(|r| !r.is_empty() && *r != NO_FAULT_DETECTED)
    {
        fields.push(reliability.to_string());
    }
    fields.join(" ")
}

/// Concatenate the lines of a device's objects, each terminated by `;`
pub fn serialise_device_batch(objs: &[Arc<PolledObject>], override_threshold: u8) -> String {
    objs.iter().fold(String::new(), |mut batch, obj| {
        batch.push_str(&object_line(obj, override_threshold));
        batch.push(';');
        batch
    })
}

pub fn mqtt_payload(obj: &PolledObject, override_threshold: u8) -> String {
    let key = obj.key();
    let state = obj.state();
    format!(
        "{} {} {} {} {}",
        key.device_id,
        key.object_id,
        key.object_type.id(),
        state.present_value,
        effective_status_flags(&state, override_threshold)
    )
}

/// Hands verified groups to the uploader and the publisher
#[derive(Clone)]
pub struct Serialiser {
    uploader: Arc<dyn BatchUploader>,
    publisher: Option<Arc<dyn ObjectPublisher>>,
    override_threshold: u8,
}

impl Serialiser {
    pub fn new(
        uploader: Arc<dyn BatchUploader>,
        publisher: Option<Arc<dyn ObjectPublisher>>,
        override_threshold: u8,
    ) -> Self {
        Self {
            uploader,
            publisher,
            override_threshold,
        }
    }

    pub async fn process(&self, device_id: u32, objs: &[Arc<PolledObject>]) {
        if objs.is_empty() {
            return;
        }

        let batch = serialise_device_batch(objs, self.override_threshold);
        debug!(
            "Device {}: submitting {} objects ({} bytes)",
            device_id,
            objs.len(),
            batch.len()
        );
        self.uploader.submit(device_id, batch);

        if let Some(publisher) = &self.publisher {
            for obj in objs {
                publisher
                    .publish(mqtt_payload(obj, self.override_threshold))
                    .await;
            }
        }
    }
}

impl std::fmt::Debug for Serialiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serialiser")
            .field("publisher", &self.publisher.is_some())
            .field("override_threshold", &self.override_threshold)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::{ObjectKey, ObjectSpec, ObjectType, PresentValue};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn object(
        object_type: ObjectType,
        object_id: u32,
        pv: PresentValue,
        flags: u8,
        pa: Option<PriorityArray>,
    ) -> Arc<PolledObject> {
        let obj = PolledObject::new(ObjectSpec::bacnet(
            ObjectKey::new(9, object_type, object_id),
            "obj",
        ));
        obj.update(|state| {
            state.present_value = pv;
            state.status_flags = StatusFlags::new(flags);
            state.priority_array = pa;
        });
        Arc::new(obj)
    }

    #[test]
    fn test_device_batch_literal() {
        let mut pa = PriorityArray::empty();
        pa.set_level(8, Some(PresentValue::Real(3.0)));
        let objs = vec![
            object(ObjectType::AnalogValue, 1, PresentValue::Real(3.0), 0, Some(pa)),
            object(ObjectType::AnalogInput, 4, PresentValue::Real(5.0), 2, None),
        ];

        assert_eq!(
            serialise_device_batch(&objs, 8),
            "1 2 3.0 ,,,,,,,3.0,,,,,,,,, 4;4 0 5.0 2;"
        );
    }

    #[test]
    fn test_reliability_and_null() {
        let obj = object(ObjectType::BinaryInput, 3, PresentValue::Null, 0, None);
        obj.update(|state| state.reliability = Some("timeout".into()));
        assert_eq!(object_line(&obj, 8), "3 3 null 2 timeout");

        obj.update(|state| state.reliability = Some(NO_FAULT_DETECTED.into()));
        assert_eq!(object_line(&obj, 8), "3 3 null 2");
    }

    #[test]
    fn test_missing_priority_array_renders_empty() {
        let obj = object(ObjectType::BinaryOutput, 7, PresentValue::Int(1), 0, None);
        assert_eq!(object_line(&obj, 8), format!("7 4 1 {} 0", ",".repeat(16)));
    }

    #[test]
    fn test_extreme_reals_render_as_decimals() {
        let big = object(ObjectType::AnalogInput, 5, PresentValue::Real(1e16), 0, None);
        assert_eq!(object_line(&big, 8), "5 0 10000000000000000.0 0");

        let small = object(ObjectType::AnalogInput, 6, PresentValue::Real(1e-7), 0, None);
        assert_eq!(mqtt_payload(&small, 8), "9 6 0 0.0000001 0");
    }

    #[test]
    fn test_mqtt_payload() {
        let obj = object(ObjectType::AnalogInput, 4, PresentValue::Real(5.0), 0, None);
        assert_eq!(mqtt_payload(&obj, 8), "9 4 0 5.0 0");
    }

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<(u32, String)>>,
        payloads: Mutex<Vec<String>>,
    }

    impl BatchUploader for Recorder {
        fn submit(&self, device_id: u32, batch: String) {
            self.batches.lock().push((device_id, batch));
        }
    }

    #[async_trait]
    impl ObjectPublisher for Recorder {
        async fn publish(&self, payload: String) {
            self.payloads.lock().push(payload);
        }
    }

    #[tokio::test]
    async fn test_process_submits_and_publishes() {
        let recorder = Arc::new(Recorder::default());
        let serialiser = Serialiser::new(recorder.clone(), Some(recorder.clone()), 8);
        let objs = vec![
            object(ObjectType::AnalogInput, 1, PresentValue::Real(1.5), 0, None),
            object(ObjectType::AnalogInput, 2, PresentValue::Null, 2, None),
        ];

        serialiser.process(9, &objs).await;
        assert_eq!(
            recorder.batches.lock().clone(),
            vec![(9, "1 0 1.5 0;2 0 null 2;".to_string())]
        );
        assert_eq!(recorder.payloads.lock().len(), 2);

        serialiser.process(9, &[]).await;
        assert_eq!(recorder.batches.lock().len(), 1);
    }
}
