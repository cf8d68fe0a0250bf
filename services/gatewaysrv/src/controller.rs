//! Gateway controller
//!
//! Owns the life-cycle: bootstrap (login, descriptors, pollers), the
//! global refresh cycle that rebuilds every device from scratch, and
//! shutdown. Also the entry point for on-demand reads and writes.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ObjectAccess;
use crate::config::GatewayConfig;
use crate::error::{GatewaySrvError, Result};
use crate::model::{ObjectKey, ObjectSnapshot, ObjectSpec, PolledObject, PresentValue};
use crate::poller::{DevicePoller, PollerSettings};
use crate::runtime::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use crate::serialiser::Serialiser;
use crate::store::ObjectStore;
use crate::transport::ClientFactory;
use crate::upstream::{BatchUploader, ObjectPublisher, UpstreamApi};
use crate::verifier::Verifier;
use crate::write_check;

/// Delay before retrying the bootstrap login
const LOGIN_RETRY_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub device_ids: Vec<u32>,
    pub update_period: Duration,
    pub shutdown_timeout: Duration,
    pub override_threshold: u8,
    pub poller: PollerSettings,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            device_ids: config.poll_device_ids.clone(),
            update_period: config.update_period,
            shutdown_timeout: config.shutdown_timeout,
            override_threshold: config.override_threshold,
            poller: config.poller_settings(),
        }
    }
}

pub struct Gateway {
    settings: GatewaySettings,
    upstream: Arc<dyn UpstreamApi>,
    factory: Arc<dyn ClientFactory>,
    verifier: Verifier,
    serialiser: Serialiser,
    store: ObjectStore,
    pollers: RwLock<HashMap<u32, Arc<DevicePoller>>>,
    /// Serialises rebuilds and shutdown
    lifecycle: AsyncMutex<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("settings", &self.settings)
            .field("devices", &self.device_ids())
            .finish()
    }
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        upstream: Arc<dyn UpstreamApi>,
        factory: Arc<dyn ClientFactory>,
        uploader: Arc<dyn BatchUploader>,
        publisher: Option<Arc<dyn ObjectPublisher>>,
    ) -> Arc<Self> {
        let serialiser = Serialiser::new(uploader, publisher, settings.override_threshold);
        Arc::new(Self {
            verifier: Verifier::new(settings.override_threshold),
            serialiser,
            settings,
            upstream,
            factory,
            store: ObjectStore::new(),
            pollers: RwLock::new(HashMap::new()),
            lifecycle: AsyncMutex::new(()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn device_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.pollers.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn poller(&self, device_id: u32) -> Option<Arc<DevicePoller>> {
        self.pollers.read().get(&device_id).cloned()
    }

    // ========================================================================
    // Life-cycle
    // ========================================================================

    /// Bootstrap, then refresh every `update_period` until cancelled
    ///
    /// Returns an error only for misconfiguration, including a login the
    /// upstream rejects for a reason retrying cannot fix.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let result = self.run_cycles().await;
        self.shutdown().await;
        result
    }

    async fn run_cycles(&self) -> Result<()> {
        if !self.wait_for_login().await? {
            return Ok(());
        }
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.build().await?;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.settings.update_period) => {},
            }
            self.refresh().await?;
        }
    }

    /// Login, retrying transient failures; false when cancelled first
    async fn wait_for_login(&self) -> Result<bool> {
        let mut helper = ReconnectHelper::new(ReconnectPolicy::from_period(LOGIN_RETRY_PERIOD));
        match helper
            .connect_with_retry(|| self.upstream.login(), &self.cancel)
            .await
        {
            Ok(()) => Ok(true),
            Err(ReconnectError::Cancelled) => Ok(false),
            Err(ReconnectError::Rejected { code, message }) => Err(GatewaySrvError::config(
                format!("Upstream login rejected [{}]: {}", code, message),
            )),
            Err(e) => {
                error!("Upstream login abandoned: {}", e);
                Ok(false)
            },
        }
    }

    /// Stop every poller, log in again and rebuild all devices
    pub async fn refresh(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Refreshing devices");
        self.stop_pollers().await;
        if let Err(e) = self.upstream.login().await {
            warn!("Re-login failed: {}", e);
        }
        self.build().await
    }

    /// Download descriptors and objects, then start one poller per device
    ///
    /// Devices that cannot be downloaded are skipped until the next
    /// refresh; configuration errors abort the build.
    pub async fn build(&self) -> Result<()> {
        for &device_id in &self.settings.device_ids {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.build_device(device_id).await {
                Ok(poller) => {
                    self.pollers.write().insert(device_id, poller);
                },
                Err(e) if e.is_config() => {
                    error!("Device {}: {}", device_id, e);
                    return Err(e);
                },
                Err(e) => warn!("Device {} skipped: {}", device_id, e),
            }
        }
        info!(
            "{} of {} devices polling",
            self.pollers.read().len(),
            self.settings.device_ids.len()
        );
        Ok(())
    }

    async fn build_device(&self, device_id: u32) -> Result<Arc<DevicePoller>> {
        let descriptor = self.upstream.device_descriptor(device_id).await?;

        let mut specs: Vec<ObjectSpec> = Vec::new();
        for &object_type in &descriptor.object_types {
            match self.upstream.device_objects(&descriptor, object_type).await {
                Ok(found) => {
                    debug!(
                        "Device {}: {} objects of type {}",
                        device_id,
                        found.len(),
                        object_type
                    );
                    specs.extend(found);
                },
                Err(e) if e.is_config() => return Err(e),
                Err(e) => warn!(
                    "Device {}: {} objects unavailable: {}",
                    device_id, object_type, e
                ),
            }
        }

        let objects = self.store.replace_device(device_id, specs)?;
        let poller = DevicePoller::new(
            descriptor,
            self.factory.clone(),
            self.verifier.clone(),
            self.serialiser.clone(),
            self.settings.poller,
        );
        poller.load_objects(objects);
        poller.start();
        Ok(poller)
    }

    /// Stop all pollers with the drain timeout and release shared clients
    async fn stop_pollers(&self) {
        let pollers: Vec<Arc<DevicePoller>> =
            self.pollers.write().drain().map(|(_, p)| p).collect();
        if !pollers.is_empty() {
            let timeout = self.settings.shutdown_timeout;
            let drained = join_all(pollers.iter().map(|p| p.stop(timeout))).await;
            let stragglers = drained.iter().filter(|ok| !**ok).count();
            if stragglers > 0 {
                warn!("{} pollers did not drain within {:?}", stragglers, timeout);
            }
        }
        self.factory.close_all().await;
        self.store.clear();
    }

    /// Stop polling, close every client once and log out
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _lifecycle = self.lifecycle.lock().await;
        info!("Gateway shutting down");
        self.stop_pollers().await;
        if let Err(e) = self.upstream.logout().await {
            warn!("Logout failed: {}", e);
        }
    }

    // ========================================================================
    // Object operations
    // ========================================================================

    fn resolve(&self, key: &ObjectKey) -> Result<(Arc<DevicePoller>, Arc<PolledObject>)> {
        let poller = self
            .poller(key.device_id)
            .filter(|p| !p.is_stopped())
            .ok_or_else(|| GatewaySrvError::device_not_found(key.device_id))?;
        let obj = self
            .store
            .get(key)
            .ok_or_else(|| GatewaySrvError::object_not_found(key))?;
        Ok((poller, obj))
    }

    /// Last verified state, without I/O
    pub fn snapshot(&self, key: &ObjectKey) -> Result<ObjectSnapshot> {
        self.store
            .get(key)
            .map(|obj| obj.snapshot())
            .ok_or_else(|| GatewaySrvError::object_not_found(key))
    }

    /// Fresh read, verified
    pub async fn read(&self, key: &ObjectKey) -> Result<ObjectSnapshot> {
        let (poller, obj) = self.resolve(key)?;
        poller.read(&obj, true).await?;
        self.verifier.verify(&obj);
        Ok(obj.snapshot())
    }

    /// Write and confirm by readback
    pub async fn write_with_check(
        &self,
        key: &ObjectKey,
        value: &PresentValue,
        priority: u8,
    ) -> Result<bool> {
        if !(1..=16).contains(&priority) {
            return Err(GatewaySrvError::validation(format!(
                "priority must be 1..=16, got {}",
                priority
            )));
        }
        let (poller, obj) = self.resolve(key)?;
        write_check::write_with_check(&poller, &obj, value, priority).await
    }
}

#[async_trait]
impl ObjectAccess for Gateway {
    async fn read(&self, key: ObjectKey) -> Result<ObjectSnapshot> {
        Gateway::read(self, &key).await
    }

    async fn write_with_check(
        &self,
        key: ObjectKey,
        value: PresentValue,
        priority: u8,
    ) -> Result<bool> {
        Gateway::write_with_check(self, &key, &value, priority).await
    }
}
