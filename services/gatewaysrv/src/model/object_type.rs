//! BACnet object types known to the gateway

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::property::PropertyId;

/// Closed set of object types, numbered as in BACnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ObjectType {
    AnalogInput = 0,
    AnalogOutput = 1,
    AnalogValue = 2,
    BinaryInput = 3,
    BinaryOutput = 4,
    BinaryValue = 5,
    Device = 8,
    MultiStateInput = 13,
    MultiStateOutput = 14,
    MultiStateValue = 19,
}

const INPUT_PROPERTIES: &[PropertyId] = &[PropertyId::PresentValue, PropertyId::StatusFlags];
const COMMANDABLE_PROPERTIES: &[PropertyId] = &[
    PropertyId::PresentValue,
    PropertyId::StatusFlags,
    PropertyId::PriorityArray,
];
const DEVICE_PROPERTIES: &[PropertyId] = &[PropertyId::ObjectIdentifier, PropertyId::ObjectName];

impl ObjectType {
    pub const ALL: [ObjectType; 10] = [
        Self::AnalogInput,
        Self::AnalogOutput,
        Self::AnalogValue,
        Self::BinaryInput,
        Self::BinaryOutput,
        Self::BinaryValue,
        Self::Device,
        Self::MultiStateInput,
        Self::MultiStateOutput,
        Self::MultiStateValue,
    ];

    /// Numeric BACnet type id
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.id() == id)
    }

    /// Dashed name used in upstream URLs (`analog-input`)
    pub fn dashed(self) -> &'static str {
        match self {
            Self::AnalogInput => "analog-input",
            Self::AnalogOutput => "analog-output",
            Self::AnalogValue => "analog-value",
            Self::BinaryInput => "binary-input",
            Self::BinaryOutput => "binary-output",
            Self::BinaryValue => "binary-value",
            Self::Device => "device",
            Self::MultiStateInput => "multi-state-input",
            Self::MultiStateOutput => "multi-state-output",
            Self::MultiStateValue => "multi-state-value",
        }
    }

    pub fn from_dashed(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.dashed() == normalized)
    }

    pub fn is_analog(self) -> bool {
        matches!(
            self,
            Self::AnalogInput | Self::AnalogOutput | Self::AnalogValue
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::BinaryInput | Self::BinaryOutput | Self::BinaryValue
        )
    }

    pub fn is_discrete(self) -> bool {
        self.is_binary()
            || matches!(
                self,
                Self::MultiStateInput | Self::MultiStateOutput | Self::MultiStateValue
            )
    }

    pub fn is_input(self) -> bool {
        matches!(
            self,
            Self::AnalogInput | Self::BinaryInput | Self::MultiStateInput
        )
    }

    pub fn is_output(self) -> bool {
        matches!(
            self,
            Self::AnalogOutput | Self::BinaryOutput | Self::MultiStateOutput
        )
    }

    /// Properties that must be present on every reading of this type
    pub fn canonical_properties(self) -> &'static [PropertyId] {
        match self {
            Self::Device => DEVICE_PROPERTIES,
            t if t.is_input() => INPUT_PROPERTIES,
            _ => COMMANDABLE_PROPERTIES,
        }
    }

    pub fn has_priority_array(self) -> bool {
        self.canonical_properties()
            .contains(&PropertyId::PriorityArray)
    }
}

impl From<ObjectType> for u16 {
    fn from(t: ObjectType) -> Self {
        t.id()
    }
}

impl TryFrom<u16> for ObjectType {
    type Error = String;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| format!("Unknown object type id: {}", id))
    }
}

impl FromStr for ObjectType {
    type Err = String;

    /// Accepts a numeric id or a dashed name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.trim().parse::<u16>() {
            return Self::try_from(id);
        }
        Self::from_dashed(s).ok_or_else(|| format!("Unknown object type: {}", s))
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dashed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(ObjectType::AnalogInput.is_analog());
        assert!(ObjectType::AnalogInput.is_input());
        assert!(!ObjectType::AnalogInput.is_output());
        assert!(ObjectType::BinaryValue.is_discrete());
        assert!(ObjectType::MultiStateOutput.is_output());
        assert!(!ObjectType::AnalogValue.is_input());
        assert!(!ObjectType::AnalogValue.is_output());
    }

    #[test]
    fn test_canonical_properties() {
        assert!(!ObjectType::AnalogInput.has_priority_array());
        assert!(ObjectType::AnalogOutput.has_priority_array());
        assert!(ObjectType::BinaryValue.has_priority_array());
        assert_eq!(
            ObjectType::MultiStateInput.canonical_properties(),
            &[PropertyId::PresentValue, PropertyId::StatusFlags]
        );
    }

    #[test]
    fn test_parse_names_and_ids() {
        assert_eq!("analog-value".parse(), Ok(ObjectType::AnalogValue));
        assert_eq!("multi_state_input".parse(), Ok(ObjectType::MultiStateInput));
        assert_eq!("19".parse(), Ok(ObjectType::MultiStateValue));
        assert!("42".parse::<ObjectType>().is_err());
        assert_eq!(ObjectType::BinaryOutput.to_string(), "binary-output");
    }
}
