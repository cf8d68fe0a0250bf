//! Polling gate
//!
//! Per-device counting latch. Writers hold a [`GateGuard`]; the gate is
//! open while no guard is alive and poll iterations wait for it.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct PollingGate {
    closers: Arc<watch::Sender<usize>>,
}

impl Default for PollingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            closers: Arc::new(tx),
        }
    }

    /// Close the gate until the returned guard is dropped
    pub fn close(&self) -> GateGuard {
        self.closers.send_modify(|n| *n += 1);
        GateGuard { gate: self.clone() }
    }

    pub fn is_open(&self) -> bool {
        *self.closers.borrow() == 0
    }

    /// Resolve once no guard is alive
    pub async fn wait_open(&self) {
        let mut rx = self.closers.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Keeps its gate closed while alive
#[derive(Debug)]
pub struct GateGuard {
    gate: PollingGate,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.closers.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_by_default() {
        let gate = PollingGate::new();
        assert!(gate.is_open());
        gate.wait_open().await;
    }

    #[tokio::test]
    async fn test_counts_nested_guards() {
        let gate = PollingGate::new();
        let a = gate.close();
        let b = gate.close();
        assert!(!gate.is_open());
        drop(a);
        assert!(!gate.is_open());
        drop(b);
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_released_on_drop() {
        let gate = PollingGate::new();
        let guard = gate.close();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
