//! Property identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of property ids, BACnet numbering
///
/// Properties cross the JSON boundary by numeric id and are referred to by
/// name token internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum PropertyId {
    Description = 28,
    ObjectIdentifier = 75,
    ObjectList = 76,
    ObjectName = 77,
    ObjectType = 79,
    OutOfService = 81,
    PresentValue = 85,
    PriorityArray = 87,
    Reliability = 103,
    RelinquishDefault = 104,
    Resolution = 106,
    StatusFlags = 111,
    Units = 117,
    PropertyList = 371,
    DeviceId = 846,
}

impl PropertyId {
    const ALL: [PropertyId; 15] = [
        Self::Description,
        Self::ObjectIdentifier,
        Self::ObjectList,
        Self::ObjectName,
        Self::ObjectType,
        Self::OutOfService,
        Self::PresentValue,
        Self::PriorityArray,
        Self::Reliability,
        Self::RelinquishDefault,
        Self::Resolution,
        Self::StatusFlags,
        Self::Units,
        Self::PropertyList,
        Self::DeviceId,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.id() == id)
    }

    /// Key used in upstream JSON objects (`"85"`)
    pub fn json_key(self) -> String {
        self.id().to_string()
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::ObjectIdentifier => "object-identifier",
            Self::ObjectList => "object-list",
            Self::ObjectName => "object-name",
            Self::ObjectType => "object-type",
            Self::OutOfService => "out-of-service",
            Self::PresentValue => "present-value",
            Self::PriorityArray => "priority-array",
            Self::Reliability => "reliability",
            Self::RelinquishDefault => "relinquish-default",
            Self::Resolution => "resolution",
            Self::StatusFlags => "status-flags",
            Self::Units => "units",
            Self::PropertyList => "property-list",
            Self::DeviceId => "device-id",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.token() == token)
    }
}

impl From<PropertyId> for u32 {
    fn from(p: PropertyId) -> Self {
        p.id()
    }
}

impl TryFrom<u32> for PropertyId {
    type Error = String;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| format!("Unknown property id: {}", id))
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_tokens() {
        assert_eq!(PropertyId::PresentValue.id(), 85);
        assert_eq!(PropertyId::from_id(111), Some(PropertyId::StatusFlags));
        assert_eq!(PropertyId::from_token("priority-array"), Some(PropertyId::PriorityArray));
        assert_eq!(PropertyId::PropertyList.json_key(), "371");
        assert_eq!(PropertyId::from_id(9999), None);
    }
}
