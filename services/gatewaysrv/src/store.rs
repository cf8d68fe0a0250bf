//! Object store
//!
//! Per-device collections of polled objects plus a key index enforcing
//! engine-wide uniqueness of (device-id, object-type-id, object-id).

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GatewaySrvError, Result};
use crate::model::{ObjectKey, ObjectSpec, PolledObject};

#[derive(Debug, Default)]
pub struct ObjectStore {
    devices: DashMap<u32, Vec<Arc<PolledObject>>>,
    index: DashMap<ObjectKey, Arc<PolledObject>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the object set of a device
    ///
    /// Every spec must belong to `device_id` and keys must be unique; on
    /// error the previous set stays in place.
    pub fn replace_device(
        &self,
        device_id: u32,
        specs: Vec<ObjectSpec>,
    ) -> Result<Vec<Arc<PolledObject>>> {
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if spec.key.device_id != device_id {
                return Err(GatewaySrvError::object(format!(
                    "Object {} does not belong to device {}",
                    spec.key, device_id
                )));
            }
            if !seen.insert(spec.key) {
                return Err(GatewaySrvError::object(format!(
                    "Duplicate object {}",
                    spec.key
                )));
            }
        }

        let objects: Vec<Arc<PolledObject>> = specs
            .into_iter()
            .map(|spec| Arc::new(PolledObject::new(spec)))
            .collect();

        self.remove_device(device_id);
        for obj in &objects {
            self.index.insert(obj.key(), obj.clone());
        }
        self.devices.insert(device_id, objects.clone());
        debug!("Stored {} objects for device {}", objects.len(), device_id);

        Ok(objects)
    }

    pub fn remove_device(&self, device_id: u32) {
        if let Some((_, objects)) = self.devices.remove(&device_id) {
            for obj in objects {
                self.index.remove(&obj.key());
            }
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<PolledObject>> {
        self.index.get(key).map(|entry| entry.value().clone())
    }

    pub fn device_objects(&self, device_id: u32) -> Vec<Arc<PolledObject>> {
        self.devices
            .get(&device_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn device_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.devices.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.index.clear();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::ObjectType;

    fn spec(device_id: u32, object_id: u32) -> ObjectSpec {
        ObjectSpec::bacnet(
            ObjectKey::new(device_id, ObjectType::AnalogInput, object_id),
            format!("AI{}", object_id),
        )
    }

    #[test]
    fn test_replace_and_lookup() {
        let store = ObjectStore::new();
        store.replace_device(1, vec![spec(1, 1), spec(1, 2)]).unwrap();
        store.replace_device(2, vec![spec(2, 1)]).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.device_ids(), vec![1, 2]);
        let key = ObjectKey::new(1, ObjectType::AnalogInput, 2);
        assert_eq!(store.get(&key).unwrap().key(), key);

        store.replace_device(1, vec![spec(1, 3)]).unwrap();
        assert!(store.get(&key).is_none());
        assert_eq!(store.device_objects(1).len(), 1);
    }

    #[test]
    fn test_duplicates_rejected_and_previous_kept() {
        let store = ObjectStore::new();
        store.replace_device(1, vec![spec(1, 1)]).unwrap();

        let err = store
            .replace_device(1, vec![spec(1, 5), spec(1, 5)])
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
        assert_eq!(store.device_objects(1).len(), 1);

        assert!(store.replace_device(1, vec![spec(2, 1)]).is_err());
    }

    #[test]
    fn test_remove_and_clear() {
        let store = ObjectStore::new();
        store.replace_device(4, vec![spec(4, 1)]).unwrap();
        store.remove_device(4);
        assert!(store.is_empty());

        store.replace_device(5, vec![spec(5, 1)]).unwrap();
        store.clear();
        assert!(store.device_ids().is_empty());
    }
}
