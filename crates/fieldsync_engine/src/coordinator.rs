//! Per-entity sync coordinator.
//!
//! The coordinator owns the retry/backoff state machine of one entity:
//!
//! ```text
//! Idle ─► Flushing ─ok──► Idle (synced)
//!            │
//!            └─err─► BackoffWait ─timer─► Flushing ...
//! ```
//!
//! A connectivity or background-wake trigger may start an out-of-schedule
//! flush while in `BackoffWait`. If that attempt fails the retry is armed
//! with the current delay; only a success resets the backoff.

use crate::background::WakeRegistrar;
use crate::backoff::Backoff;
use crate::bridge::FlushTarget;
use crate::config::SyncConfig;
use crate::connectivity::NetworkMonitor;
use crate::error::{SyncError, SyncResult};
use crate::state::SyncState;
use crate::transport::SyncTransport;
use async_trait::async_trait;
use fieldsync_protocol::{Clock, EntityId, FlushRequest, MutationRecord, OFFLINE_QUEUE_SYNC_TAG};
use fieldsync_storage::QueueStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dependencies shared by every coordinator of one service.
pub(crate) struct Shared {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<QueueStore>,
    pub(crate) transport: Arc<dyn SyncTransport>,
    pub(crate) network: NetworkMonitor,
    pub(crate) registrar: Arc<dyn WakeRegistrar>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) disposed: AtomicBool,
}

impl Shared {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Why a flush attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another flush for the same entity is in flight.
    InFlight,
    /// The host reports no connectivity.
    Offline,
    /// The owning service was disposed.
    Disposed,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No request was sent.
    Skipped(SkipReason),
    /// The queue was already empty.
    Empty,
    /// The backend acknowledged `count` records; `remaining` were appended
    /// while the request was in flight and are flushed next.
    Flushed {
        /// Records removed from the queue.
        count: usize,
        /// Records still queued.
        remaining: usize,
    },
    /// The attempt failed and a retry was scheduled.
    Failed {
        /// Failure message, as recorded in the sync state.
        error: String,
        /// Delay before the scheduled retry.
        retry_in: Duration,
    },
}

impl FlushOutcome {
    /// Returns true if a request was sent and acknowledged.
    pub fn is_flushed(&self) -> bool {
        matches!(self, FlushOutcome::Flushed { .. })
    }
}

/// Releases the single-flight flag when dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct RetryTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Drives the offline queue of one entity to the backend.
pub struct EntityCoordinator {
    entity_id: EntityId,
    shared: Arc<Shared>,
    weak_self: Weak<EntityCoordinator>,
    in_flight: AtomicBool,
    backoff: Mutex<Backoff>,
    failures: AtomicU32,
    timer: Mutex<RetryTimer>,
    state: watch::Sender<SyncState>,
}

impl EntityCoordinator {
    pub(crate) fn new(entity_id: EntityId, shared: Arc<Shared>) -> Arc<Self> {
        let backoff = Backoff::new(shared.config.backoff.clone());
        let state = watch::channel(SyncState::new(entity_id.clone())).0;
        Arc::new_cyclic(|weak_self| Self {
            entity_id,
            shared,
            weak_self: weak_self.clone(),
            in_flight: AtomicBool::new(false),
            backoff: Mutex::new(backoff),
            failures: AtomicU32::new(0),
            timer: Mutex::new(RetryTimer::default()),
            state,
        })
    }

    /// The entity this coordinator drives.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Subscribes to sync state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Delay the next failure will be retried after.
    pub fn current_backoff(&self) -> Duration {
        self.backoff.lock().current()
    }

    /// Failed attempts since the last success or dead-letter move.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Returns true while a flush request is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns true if a retry timer is armed.
    pub fn has_pending_retry(&self) -> bool {
        self.timer.lock().handle.is_some()
    }

    /// Loads the persisted queue into the sync state.
    pub(crate) async fn hydrate(&self) -> SyncResult<()> {
        let records = self.shared.store.load(&self.entity_id).await?;
        debug!(entity = %self.entity_id, pending = records.len(), "hydrated queue");
        self.state.send_modify(|s| s.hydrated(records));
        Ok(())
    }

    /// Records a change and starts a flush if the host is online.
    ///
    /// The record is durable once this returns. Network failures never
    /// surface here; they show up in the sync state and are retried.
    ///
    /// # Errors
    ///
    /// Returns an error only if the record could not be persisted, or the
    /// service was disposed.
    pub async fn submit_update(
        &self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> SyncResult<MutationRecord> {
        if self.shared.is_disposed() {
            return Err(SyncError::Disposed);
        }

        let record = MutationRecord::new(field, value, self.shared.clock.now_millis());
        let snapshot = self
            .shared
            .store
            .append(&self.entity_id, record.clone())
            .await?;
        debug!(
            entity = %self.entity_id,
            field = %record.field,
            pending = snapshot.records.len(),
            "queued update"
        );
        self.state.send_modify(|s| s.queued(snapshot.records));

        if self.shared.network.is_online() {
            self.spawn_flush();
        } else {
            self.request_background_wake().await;
        }
        Ok(record)
    }

    /// Starts a flush attempt on a new task.
    pub fn spawn_flush(&self) -> Option<JoinHandle<FlushOutcome>> {
        let this = self.weak_self.upgrade()?;
        Some(tokio::spawn(async move { this.attempt_flush().await }))
    }

    async fn request_background_wake(&self) {
        let registrar = &self.shared.registrar;
        if !registrar.is_supported() {
            debug!(entity = %self.entity_id, "background wake unsupported");
            return;
        }
        match registrar.register(OFFLINE_QUEUE_SYNC_TAG).await {
            Ok(()) => debug!(entity = %self.entity_id, "background wake registered"),
            Err(e) => warn!(entity = %self.entity_id, error = %e, "background wake registration failed"),
        }
    }

    /// Attempts to send the whole persisted queue in one request.
    ///
    /// No-op if a flush is already in flight, or if the host is offline.
    /// On success the acknowledged records are removed and the backoff is
    /// reset; on failure the queue is left as is and a retry is armed.
    pub async fn attempt_flush(&self) -> FlushOutcome {
        if self.shared.is_disposed() {
            return FlushOutcome::Skipped(SkipReason::Disposed);
        }
        let outcome = {
            let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
                debug!(entity = %self.entity_id, "flush already in flight");
                return FlushOutcome::Skipped(SkipReason::InFlight);
            };
            if !self.shared.network.is_online() {
                debug!(entity = %self.entity_id, "offline, flush skipped");
                self.state.send_modify(|s| s.waiting_for_network());
                return FlushOutcome::Skipped(SkipReason::Offline);
            }
            self.flush_once().await
        };

        if let FlushOutcome::Flushed { remaining, .. } = outcome {
            if remaining > 0 {
                self.spawn_flush();
            }
        }
        outcome
    }

    async fn flush_once(&self) -> FlushOutcome {
        // This attempt supersedes any scheduled retry.
        self.disarm();

        let records = match self.shared.store.load(&self.entity_id).await {
            Ok(records) => records,
            Err(e) => return self.on_failure(e.into(), None).await,
        };
        let Some(head) = records.first().cloned() else {
            self.backoff.lock().reset();
            self.failures.store(0, Ordering::Release);
            self.state.send_modify(|s| s.drained());
            return FlushOutcome::Empty;
        };

        let now = self.shared.clock.now_millis();
        let request = FlushRequest::new(records);
        self.state
            .send_modify(|s| s.flush_started(now, request.updates.clone()));
        debug!(entity = %self.entity_id, records = request.len(), "flushing queue");

        let timeout = self.shared.config.request_timeout;
        let sent = tokio::time::timeout(timeout, self.shared.transport.flush(&self.entity_id, &request))
            .await
            .unwrap_or(Err(SyncError::Timeout(timeout)));
        if let Err(e) = sent {
            return self.on_failure(e, Some(head)).await;
        }

        match self
            .shared
            .store
            .remove_acknowledged(&self.entity_id, &request.updates)
            .await
        {
            Ok((count, remaining)) => {
                self.backoff.lock().reset();
                self.failures.store(0, Ordering::Release);
                let left = remaining.records.len();
                self.state.send_modify(|s| s.flush_succeeded(remaining.records));
                info!(entity = %self.entity_id, count, remaining = left, "queue flushed");
                FlushOutcome::Flushed {
                    count,
                    remaining: left,
                }
            }
            // The backend has the batch; it is sent again on retry.
            Err(e) => self.on_failure(e.into(), None).await,
        }
    }

    async fn on_failure(&self, error: SyncError, head: Option<MutationRecord>) -> FlushOutcome {
        let retry_in = self.backoff.lock().on_failure();
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        let message = error.to_string();
        warn!(
            entity = %self.entity_id,
            error = %message,
            retryable = error.is_retryable(),
            failures,
            ?retry_in,
            "flush failed"
        );

        if let (Some(limit), Some(head)) = (self.shared.config.dead_letter_after, head) {
            if failures >= limit {
                self.dead_letter(&head).await;
            }
        }

        let now = self.shared.clock.now_millis();
        self.state
            .send_modify(|s| s.flush_failed(now, message.clone(), retry_in));
        self.arm_retry(retry_in);
        FlushOutcome::Failed {
            error: message,
            retry_in,
        }
    }

    async fn dead_letter(&self, head: &MutationRecord) {
        let store = &self.shared.store;
        match store.dead_letter_head(&self.entity_id, head).await {
            Ok(true) => {
                self.failures.store(0, Ordering::Release);
                warn!(entity = %self.entity_id, field = %head.field, "record dead-lettered");
                match store.load(&self.entity_id).await {
                    Ok(remaining) => self.state.send_modify(|s| s.dead_lettered(remaining)),
                    Err(e) => warn!(entity = %self.entity_id, error = %e, "reload after dead-letter failed"),
                }
            }
            Ok(false) => debug!(entity = %self.entity_id, "head changed, nothing dead-lettered"),
            Err(e) => warn!(entity = %self.entity_id, error = %e, "dead-letter move failed"),
        }
    }

    fn arm_retry(&self, delay: Duration) {
        if self.shared.is_disposed() {
            return;
        }
        let weak = self.weak_self.clone();
        let mut timer = self.timer.lock();
        timer.generation += 1;
        let generation = timer.generation;
        if let Some(previous) = timer.handle.take() {
            previous.abort();
        }
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.fire_retry(generation).await;
            }
        }));
    }

    async fn fire_retry(&self, generation: u64) {
        {
            let mut timer = self.timer.lock();
            if timer.generation != generation {
                return;
            }
            // Detach rather than abort: this is the running task.
            timer.handle = None;
        }
        debug!(entity = %self.entity_id, "retry timer fired");
        self.attempt_flush().await;
    }

    /// Cancels the scheduled retry, if any.
    pub(crate) fn disarm(&self) {
        let mut timer = self.timer.lock();
        timer.generation += 1;
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for EntityCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for EntityCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCoordinator")
            .field("entity_id", &self.entity_id)
            .field("in_flight", &self.is_in_flight())
            .field("failures", &self.consecutive_failures())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FlushTarget for EntityCoordinator {
    async fn flush_pending(&self) {
        self.attempt_flush().await;
    }
}
