//! Sync service: owns coordinators, the wake bridge and their lifecycle.

use crate::background::{BackgroundChannel, BackgroundWorker, NoopRegistrar, WakeRegistrar};
use crate::bridge::{FlushTarget, WakeBridge};
use crate::config::SyncConfig;
use crate::connectivity::NetworkMonitor;
use crate::coordinator::{EntityCoordinator, FlushOutcome, Shared};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use crate::view::EntitySyncView;
use async_trait::async_trait;
use fieldsync_protocol::{Clock, EntityId, SystemClock};
use fieldsync_storage::{InMemoryStore, KeyValueStore, QueueStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ServiceInner {
    shared: Arc<Shared>,
    channel: BackgroundChannel,
    entities: Mutex<HashMap<EntityId, Arc<EntityCoordinator>>>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceInner {
    async fn coordinator(
        &self,
        entity: &EntityId,
        flush_on_create: bool,
    ) -> SyncResult<Arc<EntityCoordinator>> {
        let existing = self.entities.lock().get(entity).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let created = EntityCoordinator::new(entity.clone(), self.shared.clone());
        created.hydrate().await?;
        let coordinator = self
            .entities
            .lock()
            .entry(entity.clone())
            .or_insert_with(|| created.clone())
            .clone();

        // Only the first reference flushes a queue left over from a
        // previous run.
        if Arc::ptr_eq(&coordinator, &created)
            && flush_on_create
            && self.shared.network.is_online()
        {
            coordinator.spawn_flush();
        }
        Ok(coordinator)
    }

    async fn flush_all(&self) -> Vec<(EntityId, FlushOutcome)> {
        let mut ids: Vec<EntityId> = self.entities.lock().keys().cloned().collect();
        match self.shared.store.pending_entities().await {
            Ok(pending) => {
                for id in pending {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            Err(e) => warn!(error = %e, "listing pending queues failed"),
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.coordinator(&id, false).await {
                Ok(coordinator) => {
                    let outcome = coordinator.attempt_flush().await;
                    outcomes.push((id, outcome));
                }
                Err(e) => warn!(entity = %id, error = %e, "hydration failed"),
            }
        }
        outcomes
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(handle) = self.bridge.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl FlushTarget for ServiceInner {
    async fn flush_pending(&self) {
        let outcomes = self.flush_all().await;
        debug!(entities = outcomes.len(), "flushed pending queues");
    }
}

/// Offline-first sync service.
///
/// One service per process context. Call [`SyncService::init`] once to
/// start listening for connectivity and background-wake signals, and
/// [`SyncService::dispose`] to stop. Views of the same entity share one
/// coordinator.
///
/// # Example
///
/// ```no_run
/// use fieldsync_engine::{MockTransport, SyncConfig, SyncService};
/// use fieldsync_protocol::EntityId;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = SyncService::builder(MockTransport::new())
///     .config(SyncConfig::new("https://api.example.com/jobs/{entity_id}/sync"))
///     .build();
/// service.init()?;
///
/// let job = service.view(&EntityId::new("J1")?).await?;
/// job.submit_update("status", "in_progress").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

impl SyncService {
    /// Starts building a service around `transport`.
    pub fn builder<T: SyncTransport + 'static>(transport: T) -> SyncServiceBuilder {
        SyncServiceBuilder::new(Arc::new(transport))
    }

    /// Starts listening for connectivity and background-wake signals.
    ///
    /// Must be called from within a Tokio runtime. Calling it again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Disposed`] after [`SyncService::dispose`].
    pub fn init(&self) -> SyncResult<()> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        let mut bridge = self.inner.bridge.lock();
        if bridge.is_none() {
            let wake = WakeBridge::new(&self.inner.shared.network, &self.inner.channel);
            *bridge = Some(wake.spawn(Arc::downgrade(&self.inner)));
            info!("sync service initialized");
        }
        Ok(())
    }

    /// Stops the wake bridge and every retry timer.
    ///
    /// Persisted queues are untouched; a new service picks them up.
    pub fn dispose(&self) {
        if self.inner.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.bridge.lock().take() {
            handle.abort();
        }
        for coordinator in self.inner.entities.lock().values() {
            coordinator.disarm();
        }
        info!("sync service disposed");
    }

    /// Returns true once [`SyncService::init`] ran and the service was not
    /// disposed since.
    pub fn is_initialized(&self) -> bool {
        self.inner.bridge.lock().is_some()
    }

    /// Returns true after [`SyncService::dispose`].
    pub fn is_disposed(&self) -> bool {
        self.inner.shared.is_disposed()
    }

    /// Returns the view of `entity`.
    ///
    /// The first reference hydrates the view from the queue store and, if
    /// online, flushes whatever a previous run left behind.
    ///
    /// # Errors
    ///
    /// Fails if the service was disposed or the persisted queue cannot be
    /// read.
    pub async fn view(&self, entity: &EntityId) -> SyncResult<EntitySyncView> {
        Ok(EntitySyncView::new(self.coordinator(entity).await?))
    }

    /// Returns the coordinator of `entity`, creating it on first use.
    pub async fn coordinator(&self, entity: &EntityId) -> SyncResult<Arc<EntityCoordinator>> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        self.inner.coordinator(entity, true).await
    }

    /// Attempts a flush of every known or persisted non-empty queue, one
    /// entity at a time.
    pub async fn flush_all(&self) -> Vec<(EntityId, FlushOutcome)> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.inner.flush_all().await
    }

    /// Entities referenced so far.
    pub fn entities(&self) -> Vec<EntityId> {
        self.inner.entities.lock().keys().cloned().collect()
    }

    /// The connectivity monitor the service listens to.
    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.shared.network
    }

    /// The channel the background context posts to.
    pub fn channel(&self) -> &BackgroundChannel {
        &self.inner.channel
    }

    /// A background worker posting to this service's channel.
    pub fn background_worker(&self) -> BackgroundWorker {
        BackgroundWorker::new(self.inner.channel.clone())
    }

    /// The durable queue store.
    pub fn store(&self) -> &Arc<QueueStore> {
        &self.inner.shared.store
    }

    /// The service configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.shared.config
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("entities", &self.entities())
            .field("online", &self.network().is_online())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncService`].
pub struct SyncServiceBuilder {
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
    backend: Option<Arc<dyn KeyValueStore>>,
    store: Option<Arc<QueueStore>>,
    network: Option<NetworkMonitor>,
    channel: Option<BackgroundChannel>,
    registrar: Option<Arc<dyn WakeRegistrar>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncServiceBuilder {
    fn new(transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            transport,
            config: SyncConfig::default(),
            backend: None,
            store: None,
            network: None,
            channel: None,
            registrar: None,
            clock: None,
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists queues in `backend`. Defaults to an in-memory store.
    pub fn backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses an existing queue store, overriding [`Self::backend`].
    pub fn store(mut self, store: Arc<QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Listens to `network`. Defaults to a monitor reporting online.
    pub fn network(mut self, network: NetworkMonitor) -> Self {
        self.network = Some(network);
        self
    }

    /// Listens to `channel` for background-wake messages.
    pub fn background(mut self, channel: BackgroundChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Registers background wakes through `registrar`. Defaults to
    /// [`NoopRegistrar`].
    pub fn registrar(mut self, registrar: impl WakeRegistrar + 'static) -> Self {
        self.registrar = Some(Arc::new(registrar));
        self
    }

    /// Stamps records and attempts with `clock`. Defaults to the system
    /// clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the service. Call [`SyncService::init`] to start it.
    pub fn build(self) -> SyncService {
        let store = self.store.unwrap_or_else(|| {
            let backend = self
                .backend
                .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
            Arc::new(QueueStore::with_options(backend, self.config.queue.clone()))
        });
        let shared = Arc::new(Shared {
            config: self.config,
            store,
            transport: self.transport,
            network: self.network.unwrap_or_default(),
            registrar: self.registrar.unwrap_or_else(|| Arc::new(NoopRegistrar)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            disposed: AtomicBool::new(false),
        });
        SyncService {
            inner: Arc::new(ServiceInner {
                shared,
                channel: self.channel.unwrap_or_default(),
                entities: Mutex::new(HashMap::new()),
                bridge: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn job() -> EntityId {
        EntityId::new("J1").unwrap()
    }

    #[tokio::test]
    async fn views_share_one_coordinator() {
        let service = SyncService::builder(MockTransport::new()).build();
        let a = service.coordinator(&job()).await.unwrap();
        let b = service.coordinator(&job()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(service.entities(), vec![job()]);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_dispose_is_final() {
        let service = SyncService::builder(MockTransport::new()).build();
        assert!(!service.is_initialized());
        service.init().unwrap();
        service.init().unwrap();
        assert!(service.is_initialized());

        service.dispose();
        assert!(service.is_disposed());
        assert!(!service.is_initialized());
        assert!(matches!(service.init(), Err(SyncError::Disposed)));
        assert!(matches!(
            service.view(&job()).await,
            Err(SyncError::Disposed)
        ));
        assert!(service.flush_all().await.is_empty());
    }

    #[tokio::test]
    async fn flush_all_covers_unreferenced_queues() {
        let transport = MockTransport::new();
        let service = SyncService::builder(transport.clone())
            .network(NetworkMonitor::new(false))
            .build();
        let other = EntityId::new("J2").unwrap();
        service
            .store()
            .append(&other, fieldsync_protocol::MutationRecord::new("status", "done", 5))
            .await
            .unwrap();

        service.network().set_online(true);
        let outcomes = service.flush_all().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, other);
        assert!(outcomes[0].1.is_flushed());
        assert_eq!(transport.calls(), 1);
    }
}
