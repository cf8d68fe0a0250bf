//! Device poller
//!
//! Groups a device's objects by poll period and runs one periodic task per
//! group. Objects that keep failing are parked in an unreachable set and
//! re-admitted every `unreachable_reset_period`; objects the device reports
//! as unknown are dropped until the next rebuild.

pub mod gate;

pub use gate::{GateGuard, PollingGate};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{DeviceDescriptor, ObjectKey, PolledObject};
use crate::runtime::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use crate::serialiser::Serialiser;
use crate::transport::{ClientFactory, DeviceClient};
use crate::verifier::Verifier;

/// Engine-wide recovery policy
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    /// Consecutive failures that park an object
    pub unreachable_threshold: u32,
    pub unreachable_reset_period: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            unreachable_threshold: 3,
            unreachable_reset_period: Duration::from_secs(600),
        }
    }
}

type Groups = BTreeMap<Duration, Vec<Arc<PolledObject>>>;

pub struct DevicePoller {
    descriptor: DeviceDescriptor,
    factory: Arc<dyn ClientFactory>,
    /// Creation lock around the lazily created client
    client: AsyncMutex<Option<Arc<dyn DeviceClient>>>,
    verifier: Verifier,
    serialiser: Serialiser,
    settings: PollerSettings,
    gate: PollingGate,
    groups: parking_lot::Mutex<Groups>,
    unreachable: parking_lot::Mutex<Vec<Arc<PolledObject>>>,
    missing: parking_lot::Mutex<Vec<Arc<PolledObject>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DevicePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePoller")
            .field("device_id", &self.descriptor.device_id)
            .field("protocol", &self.descriptor.protocol)
            .field("periods", &self.groups.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DevicePoller {
    pub fn new(
        descriptor: DeviceDescriptor,
        factory: Arc<dyn ClientFactory>,
        verifier: Verifier,
        serialiser: Serialiser,
        settings: PollerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            factory,
            client: AsyncMutex::new(None),
            verifier,
            serialiser,
            settings,
            gate: PollingGate::new(),
            groups: parking_lot::Mutex::new(BTreeMap::new()),
            unreachable: parking_lot::Mutex::new(Vec::new()),
            missing: parking_lot::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.descriptor.device_id
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn gate(&self) -> &PollingGate {
        &self.gate
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Client for this device, created on first use
    pub async fn client(&self) -> Result<Arc<dyn DeviceClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = self.factory.create(&self.descriptor).await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    // ========================================================================
    // Object sets
    // ========================================================================

    /// Replace the object set, grouped by effective poll period
    pub fn load_objects(&self, objs: Vec<Arc<PolledObject>>) {
        let _closed = self.gate.close();

        let mut groups = Groups::new();
        for obj in objs {
            let period = obj.spec().effective_poll_period(self.descriptor.poll_period);
            groups.entry(period).or_default().push(obj);
        }

        info!(
            "Device {}: loaded {} objects in {} poll groups",
            self.device_id(),
            groups.values().map(Vec::len).sum::<usize>(),
            groups.len()
        );
        *self.groups.lock() = groups;
        self.unreachable.lock().clear();
        self.missing.lock().clear();
    }

    pub fn periods(&self) -> Vec<Duration> {
        self.groups.lock().keys().copied().collect()
    }

    /// Objects currently polled, in group order
    pub fn live_objects(&self) -> Vec<ObjectKey> {
        self.groups
            .lock()
            .values()
            .flatten()
            .map(|obj| obj.key())
            .collect()
    }

    pub fn unreachable_objects(&self) -> Vec<ObjectKey> {
        self.unreachable.lock().iter().map(|obj| obj.key()).collect()
    }

    pub fn missing_objects(&self) -> Vec<ObjectKey> {
        self.missing.lock().iter().map(|obj| obj.key()).collect()
    }

    fn group(&self, period: Duration) -> Vec<Arc<PolledObject>> {
        self.groups.lock().get(&period).cloned().unwrap_or_default()
    }

    /// Park objects over the failure threshold and drop unknown ones
    fn check_unreachable(&self, period: Duration) {
        let threshold = self.settings.unreachable_threshold;
        let mut parked = Vec::new();
        let mut dropped = Vec::new();

        if let Some(group) = self.groups.lock().get_mut(&period) {
            group.retain(|obj| {
                if !obj.exists() {
                    dropped.push(obj.clone());
                    false
                } else if obj.unreachable_in_row() >= threshold {
                    parked.push(obj.clone());
                    false
                } else {
                    true
                }
            });
        }

        for obj in &parked {
            warn!(
                "Object {} unreachable {} times in a row, parked",
                obj.key(),
                obj.unreachable_in_row()
            );
        }
        for obj in &dropped {
            warn!("Object {} does not exist on the device, dropped", obj.key());
        }
        self.unreachable.lock().extend(parked);
        self.missing.lock().extend(dropped);
    }

    /// Move every parked object back into its live group
    pub fn reset_unreachable(&self) -> usize {
        let parked = std::mem::take(&mut *self.unreachable.lock());
        if parked.is_empty() {
            return 0;
        }

        let count = parked.len();
        let mut groups = self.groups.lock();
        for obj in parked {
            let period = obj.spec().effective_poll_period(self.descriptor.poll_period);
            groups.entry(period).or_default().push(obj);
        }
        info!(
            "Device {}: {} unreachable objects re-admitted",
            self.device_id(),
            count
        );
        count
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read one object and record the outcome
    ///
    /// With `wait` the read first waits for the polling gate.
    pub async fn read(&self, obj: &PolledObject, wait: bool) -> Result<()> {
        if wait {
            self.gate.wait_open().await;
        }
        let client = self.client().await?;
        let outcome = client.read(obj.spec()).await;
        if let Err(failure) = &outcome {
            debug!("Read {} failed: {}", obj.key(), failure);
        }
        obj.record(outcome);
        Ok(())
    }

    /// Verify a polled group and hand it downstream
    pub async fn process_polled(&self, objs: &[Arc<PolledObject>]) {
        for obj in objs {
            self.verifier.verify(obj);
        }
        self.serialiser.process(self.device_id(), objs).await;
    }

    // ========================================================================
    // Life-cycle
    // ========================================================================

    /// Connect (retrying every `reconnect_period` with backoff) and start
    /// the periodic tasks
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.spawn(async move {
            let policy = ReconnectPolicy::from_period(this.descriptor.reconnect_period);
            let mut helper = ReconnectHelper::new(policy);
            match helper
                .connect_with_retry(|| this.client(), &this.cancel)
                .await
            {
                Ok(_) => this.start_periodic_polls(),
                Err(ReconnectError::Cancelled) => {
                    debug!("Device {}: start cancelled", this.device_id())
                },
                Err(e) => error!("Device {}: giving up: {}", this.device_id(), e),
            }
        });
    }

    fn start_periodic_polls(self: &Arc<Self>) {
        let periods = self.periods();
        for period in &periods {
            let this = self.clone();
            let period = *period;
            self.spawn(async move { this.periodic_poll(period).await });
        }

        let this = self.clone();
        self.spawn(async move { this.periodic_reset_unreachable().await });
        info!(
            "Device {}: polling started ({} groups)",
            self.device_id(),
            periods.len()
        );
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = self.tracker.spawn(task);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    async fn periodic_poll(self: Arc<Self>, period: Duration) {
        let mut first = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.gate.wait_open() => {},
            }

            let started = Instant::now();
            let objs = self.group(period);
            for obj in &objs {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    result = self.read(obj, true) => {
                        if let Err(e) = result {
                            warn!("Device {}: read {} skipped: {}", self.device_id(), obj.key(), e);
                        }
                    },
                }
            }

            self.check_unreachable(period);
            if first {
                debug!(
                    "Device {}: first cycle of {:?} group done ({} objects)",
                    self.device_id(),
                    period,
                    objs.len()
                );
                first = false;
            }

            let this = self.clone();
            self.spawn(async move { this.process_polled(&objs).await });

            let elapsed = started.elapsed();
            if elapsed > period {
                warn!(
                    "Device {}: poll of {:?} group took {:?}",
                    self.device_id(),
                    period,
                    elapsed
                );
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(period.saturating_sub(elapsed)) => {},
            }
        }
    }

    async fn periodic_reset_unreachable(self: Arc<Self>) {
        let period = self.settings.unreachable_reset_period;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {},
            }
            self.reset_unreachable();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every task, wait up to `drain_timeout`, abort stragglers and
    /// release the client. Returns whether all tasks drained in time.
    pub async fn stop(&self, drain_timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            let handles = std::mem::take(&mut *self.handles.lock());
            warn!(
                "Device {}: aborting {} tasks after {:?}",
                self.device_id(),
                handles.iter().filter(|h| !h.is_finished()).count(),
                drain_timeout
            );
            for handle in handles {
                handle.abort();
            }
        }

        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
        info!("Device {}: poller stopped", self.device_id());
        drained
    }
}
