//! Verifier
//!
//! Canonicalises the raw outcome a read left on an object: normalises the
//! present value, rounds analog values to the object's resolution and
//! re-derives status flags and reliability.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::model::{
    ObjectSpec, ObjectState, PolledObject, PresentValue, RawReading, RawValue, ReadFailure,
    StatusFlag, StatusFlags,
};

/// Reliability tag for a positive-infinity reading
pub const RELIABILITY_OVER_RANGE: &str = "2";
/// Reliability tag for a negative-infinity reading
pub const RELIABILITY_UNDER_RANGE: &str = "3";

#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    override_threshold: u8,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Verifier {
    /// `override_threshold` is a 1-based priority level
    pub fn new(override_threshold: u8) -> Self {
        Self { override_threshold }
    }

    pub fn override_threshold(&self) -> u8 {
        self.override_threshold
    }

    /// Verify the pending reading of `obj`; no-op when nothing is pending
    pub fn verify(&self, obj: &PolledObject) {
        let spec = obj.spec();
        obj.update(|state| self.verify_state(spec, state, Utc::now()));
    }

    pub fn verify_state(&self, spec: &ObjectSpec, state: &mut ObjectState, now: DateTime<Utc>) {
        let Some(outcome) = state.pending.take() else {
            return;
        };

        let previous = state.present_value.clone();
        match outcome {
            Ok(reading) => self.apply_reading(spec, state, reading),
            Err(failure) => process_failure(state, &failure),
        }

        if state.present_value != previous {
            state.changed_at = Some(now);
        }
        trace!(
            "Verified {}: pv={} sf={} rel={:?}",
            spec.key,
            state.present_value,
            state.status_flags,
            state.reliability
        );
    }

    /// Canonical form of a value for `spec` (used to compare readbacks)
    pub fn canonical(&self, spec: &ObjectSpec, value: &PresentValue) -> PresentValue {
        canonical_value(spec, RawValue::from(value.clone())).0
    }

    fn apply_reading(&self, spec: &ObjectSpec, state: &mut ObjectState, reading: RawReading) {
        let (value, value_reliability) = canonical_value(spec, reading.value);

        let mut flags = reading.status_flags.unwrap_or_default();
        flags.set(StatusFlag::Fault, value.is_null());
        if let Some(pa) = &reading.priority_array {
            flags.set(
                StatusFlag::Overriden,
                pa.any_at_or_above_level(self.override_threshold),
            );
        }

        state.present_value = value;
        state.status_flags = flags;
        state.priority_array = reading.priority_array;
        state.reliability = if flags.is_clear() {
            None
        } else {
            value_reliability.or(reading.reliability)
        };
    }
}

fn process_failure(state: &mut ObjectState, failure: &ReadFailure) {
    state.present_value = PresentValue::Null;
    state.status_flags = StatusFlags::default().enable(StatusFlag::Fault);
    state.reliability = Some(failure.reliability());
    state.priority_array = None;
}

fn canonical_value(spec: &ObjectSpec, raw: RawValue) -> (PresentValue, Option<String>) {
    let (value, reliability) = normalize(raw);
    let value = if spec.key.object_type.is_analog() {
        round_analog(value, spec.resolution)
    } else if spec.key.object_type.is_discrete() {
        whole_to_int(value)
    } else {
        value
    };
    (value, reliability)
}

/// Map a raw value onto the present-value domain
fn normalize(value: RawValue) -> (PresentValue, Option<String>) {
    match value {
        RawValue::Null => (PresentValue::Null, None),
        RawValue::Bool(b) => (PresentValue::Int(i64::from(b)), None),
        RawValue::Int(i) => (PresentValue::Int(i), None),
        RawValue::Real(r) if r == f64::INFINITY => {
            (PresentValue::Null, Some(RELIABILITY_OVER_RANGE.to_string()))
        },
        RawValue::Real(r) if r == f64::NEG_INFINITY => {
            (PresentValue::Null, Some(RELIABILITY_UNDER_RANGE.to_string()))
        },
        RawValue::Real(r) if r.is_nan() => (PresentValue::Null, None),
        RawValue::Real(r) => (PresentValue::Real(r), None),
        RawValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                (PresentValue::Null, None)
            } else if trimmed.eq_ignore_ascii_case("active") {
                (PresentValue::Int(1), None)
            } else if trimmed.eq_ignore_ascii_case("inactive") {
                (PresentValue::Int(0), None)
            } else {
                (PresentValue::Text(s), None)
            }
        },
    }
}

/// `round(v / r) * r`, then rounded to the decimals of `r`
fn round_analog(value: PresentValue, resolution: f64) -> PresentValue {
    let Some(v) = numeric(&value) else {
        return value;
    };
    if resolution.is_nan() || resolution <= 0.0 {
        return PresentValue::Real(v);
    }
    let stepped = (v / resolution).round() * resolution;
    let scale = 10f64.powi(decimals(resolution) as i32);
    PresentValue::Real((stepped * scale).round() / scale)
}

fn whole_to_int(value: PresentValue) -> PresentValue {
    match value {
        PresentValue::Real(r) if r.fract() == 0.0 && r.abs() < i64::MAX as f64 => {
            PresentValue::Int(r as i64)
        },
        other => other,
    }
}

fn numeric(value: &PresentValue) -> Option<f64> {
    match value {
        PresentValue::Int(i) => Some(*i as f64),
        PresentValue::Real(r) => Some(*r),
        PresentValue::Null | PresentValue::Text(_) => None,
    }
}

/// Number of fractional digits in the shortest rendering of `r`
fn decimals(resolution: f64) -> usize {
    let rendered = format!("{}", resolution);
    rendered
        .split_once('.')
        .map(|(_, frac)| frac.len())
        .unwrap_or(0)
        .min(12)
}
