//! Write-with-check
//!
//! Closes the device's polling gate, writes the value and reads it back
//! under the same resource lock, then compares the verified readback with
//! the written value. A readback that fails never confirms the write.

use tracing::{info, warn};

use crate::error::Result;
use crate::model::{PolledObject, PresentValue};
use crate::poller::DevicePoller;

/// Write `value` at `priority` and report whether the readback matches
pub async fn write_with_check(
    poller: &DevicePoller,
    obj: &PolledObject,
    value: &PresentValue,
    priority: u8,
) -> Result<bool> {
    let _closed = poller.gate().close();

    let client = poller.client().await?;
    let outcome = client
        .write_with_readback(obj.spec(), value, priority)
        .await?;
    let readback_failed = outcome.is_err();
    obj.record(outcome);
    poller.verifier().verify(obj);

    // A failed readback observed nothing, even when the write was a relinquish
    if readback_failed {
        warn!(
            "Write {} = {} at priority {}: readback failed ({})",
            obj.key(),
            value,
            priority,
            obj.state().reliability.as_deref().unwrap_or("unknown")
        );
        return Ok(false);
    }

    let expected = poller.verifier().canonical(obj.spec(), value);
    let observed = obj.state().present_value;
    let matched = values_match(&expected, &observed);
    if matched {
        info!(
            "Write {} = {} at priority {} confirmed",
            obj.key(),
            value,
            priority
        );
    } else {
        warn!(
            "Write {} = {} at priority {}: read back {}",
            obj.key(),
            value,
            priority,
            observed
        );
    }
    Ok(matched)
}

/// Numeric values compare by value, everything else structurally
pub fn values_match(expected: &PresentValue, observed: &PresentValue) -> bool {
    match (expected, observed) {
        (PresentValue::Null, PresentValue::Null) => true,
        (PresentValue::Null, _) | (_, PresentValue::Null) => false,
        (PresentValue::Text(a), PresentValue::Text(b)) => a == b,
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}
