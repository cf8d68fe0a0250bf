//! Present values, raw readings and priority arrays

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of BACnet priority levels
pub const PRIORITY_LEVELS: usize = 16;

/// A verified present value
///
/// `Null` is the sentinel for "no trustworthy value"; an object holding it
/// always carries the FAULT flag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresentValue {
    #[default]
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl PresentValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Build from a JSON scalar (inbound write requests, priority arrays)
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Real)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PresentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{}", v),
            // Plain decimal, never exponent form; whole reals keep one digit: 3.0
            Self::Real(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{}.0", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PresentValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PresentValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

/// Value exactly as decoded from the wire, before verification
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Null | Self::Text(_) => None,
        }
    }
}

impl From<PresentValue> for RawValue {
    fn from(v: PresentValue) -> Self {
        match v {
            PresentValue::Null => Self::Null,
            PresentValue::Int(i) => Self::Int(i),
            PresentValue::Real(r) => Self::Real(r),
            PresentValue::Text(s) => Self::Text(s),
        }
    }
}

/// 16-slot priority array; `None` marks an empty (relinquished) slot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriorityArray(Vec<Option<PresentValue>>);

impl PriorityArray {
    pub fn empty() -> Self {
        Self(vec![None; PRIORITY_LEVELS])
    }

    /// Build from up to 16 slots; missing trailing slots are empty
    pub fn from_slots(slots: impl IntoIterator<Item = Option<PresentValue>>) -> Self {
        let mut entries: Vec<Option<PresentValue>> = slots
            .into_iter()
            .take(PRIORITY_LEVELS)
            .map(|slot| slot.filter(|v| !v.is_null()))
            .collect();
        entries.resize(PRIORITY_LEVELS, None);
        Self(entries)
    }

    /// Slot by zero-based index
    pub fn get(&self, index: usize) -> Option<&PresentValue> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Set the slot for a 1-based priority level
    pub fn set_level(&mut self, level: u8, value: Option<PresentValue>) {
        if let Some(slot) = (level as usize)
            .checked_sub(1)
            .and_then(|idx| self.0.get_mut(idx))
        {
            *slot = value.filter(|v| !v.is_null());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn slots(&self) -> impl Iterator<Item = Option<&PresentValue>> {
        self.0.iter().map(Option::as_ref)
    }

    /// Whether any slot at priority level >= `level` (1-based) is occupied
    pub fn any_at_or_above_level(&self, level: u8) -> bool {
        let start = (level as usize).saturating_sub(1);
        self.0.iter().skip(start).any(Option::is_some)
    }
}

impl fmt::Display for PriorityArray {
    /// Every slot is terminated by a comma; empty slots render as nothing
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.0 {
            if let Some(value) = slot {
                write!(f, "{}", value)?;
            }
            f.write_str(",")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_value_rendering() {
        assert_eq!(PresentValue::Null.to_string(), "null");
        assert_eq!(PresentValue::Int(1).to_string(), "1");
        assert_eq!(PresentValue::Real(3.0).to_string(), "3.0");
        assert_eq!(PresentValue::Real(40.5).to_string(), "40.5");
        assert_eq!(PresentValue::Real(100.0).to_string(), "100.0");
        assert_eq!(PresentValue::Text("auto".into()).to_string(), "auto");
    }

    #[test]
    fn test_real_rendering_stays_decimal() {
        assert_eq!(PresentValue::Real(1e16).to_string(), "10000000000000000.0");
        assert_eq!(PresentValue::Real(1e-7).to_string(), "0.0000001");
        assert_eq!(PresentValue::Real(-2.5e-5).to_string(), "-0.000025");
        assert_eq!(PresentValue::Real(-40.0).to_string(), "-40.0");
        assert!(!PresentValue::Real(123456789.0e10).to_string().contains('e'));
    }

    #[test]
    fn test_priority_array_rendering() {
        let mut pa = PriorityArray::empty();
        pa.set_level(9, Some(PresentValue::Real(40.5)));
        pa.set_level(16, Some(PresentValue::Real(49.2)));
        assert_eq!(pa.to_string(), ",,,,,,,,40.5,,,,,,,49.2,");

        let pa = PriorityArray::empty();
        assert_eq!(pa.to_string(), ",".repeat(16));
    }

    #[test]
    fn test_priority_array_levels() {
        let mut pa = PriorityArray::empty();
        assert!(pa.is_empty());
        pa.set_level(8, Some(PresentValue::Int(3)));
        assert_eq!(pa.get(7), Some(&PresentValue::Int(3)));
        assert!(pa.any_at_or_above_level(8));
        assert!(!pa.any_at_or_above_level(9));

        pa.set_level(8, Some(PresentValue::Null));
        assert!(pa.is_empty());

        // Out-of-range levels are ignored
        pa.set_level(0, Some(PresentValue::Int(1)));
        pa.set_level(17, Some(PresentValue::Int(1)));
        assert!(pa.is_empty());
    }

    #[test]
    fn test_from_slots_pads_and_truncates() {
        let pa = PriorityArray::from_slots(vec![Some(PresentValue::Int(1)), None]);
        assert_eq!(pa.slots().count(), PRIORITY_LEVELS);
        assert_eq!(pa.get(0), Some(&PresentValue::Int(1)));

        let pa = PriorityArray::from_slots((0..20).map(|i| Some(PresentValue::Int(i))));
        assert_eq!(pa.slots().count(), PRIORITY_LEVELS);
    }

    #[test]
    fn test_present_value_from_json() {
        assert_eq!(
            PresentValue::from_json(&serde_json::json!(7)),
            Some(PresentValue::Int(7))
        );
        assert_eq!(
            PresentValue::from_json(&serde_json::json!(7.5)),
            Some(PresentValue::Real(7.5))
        );
        assert_eq!(
            PresentValue::from_json(&serde_json::json!(true)),
            Some(PresentValue::Int(1))
        );
        assert_eq!(PresentValue::from_json(&serde_json::json!([1])), None);
    }
}
