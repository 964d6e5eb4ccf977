//! Entity sync view, the application-facing façade.

use crate::coordinator::{EntityCoordinator, FlushOutcome};
use crate::error::SyncResult;
use crate::state::{SyncPhase, SyncState};
use fieldsync_protocol::{EntityId, MutationRecord};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Read-mostly view of one entity's offline queue.
///
/// [`EntitySyncView::submit_update`] is the only write path to the queue.
/// Views are cheap to clone; dropping every view does not affect the
/// persisted queue or the coordinator.
#[derive(Debug, Clone)]
pub struct EntitySyncView {
    coordinator: Arc<EntityCoordinator>,
    state: watch::Receiver<SyncState>,
}

impl EntitySyncView {
    pub(crate) fn new(coordinator: Arc<EntityCoordinator>) -> Self {
        let state = coordinator.subscribe();
        Self { coordinator, state }
    }

    /// The entity this view belongs to.
    pub fn entity_id(&self) -> &EntityId {
        self.coordinator.entity_id()
    }

    /// Current state.
    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Records waiting for a successful flush, oldest first.
    pub fn updates(&self) -> Vec<MutationRecord> {
        self.state.borrow().updates.clone()
    }

    /// True iff the queue is empty.
    pub fn is_synced(&self) -> bool {
        self.state.borrow().synced
    }

    /// Time of the last network attempt, in epoch milliseconds.
    pub fn last_attempt(&self) -> Option<i64> {
        self.state.borrow().last_attempt
    }

    /// Message of the last failed attempt.
    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Records dead-lettered by this process.
    pub fn dead_lettered(&self) -> usize {
        self.state.borrow().dead_lettered
    }

    /// Coordinator phase.
    pub fn phase(&self) -> SyncPhase {
        self.state.borrow().phase
    }

    /// Waits until the state changes, then returns the new state.
    ///
    /// Returns `None` if the coordinator is gone.
    pub async fn changed(&mut self) -> Option<SyncState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Waits until `predicate` holds for the state, checking the current
    /// state first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SyncState) -> bool,
    ) -> Option<SyncState> {
        let state = self.state.wait_for(|s| predicate(s)).await.ok()?;
        Some(state.clone())
    }

    /// Records a change for this entity.
    ///
    /// See [`EntityCoordinator::submit_update`].
    pub async fn submit_update(
        &self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> SyncResult<MutationRecord> {
        self.coordinator.submit_update(field, value).await
    }

    /// Attempts a flush now and waits for it.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.coordinator.attempt_flush().await
    }
}
