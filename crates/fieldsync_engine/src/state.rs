//! Per-entity sync state.
//!
//! [`SyncState`] is a projection of the persisted queue plus the
//! coordinator's transient attempt metadata. It only changes through the
//! transitions below, so it can be exercised without any UI harness.

use fieldsync_protocol::{EntityId, MutationRecord};
use std::time::Duration;

/// Coordinator phase for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No flush is running and no retry is scheduled.
    Idle,
    /// A flush request is in flight.
    Flushing,
    /// The last flush failed; a retry is scheduled.
    BackoffWait {
        /// Delay the retry was scheduled with.
        retry_in: Duration,
    },
}

impl SyncPhase {
    /// Returns true while a flush request is in flight.
    pub fn is_flushing(&self) -> bool {
        matches!(self, SyncPhase::Flushing)
    }
}

/// Observable sync state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    /// The entity this state belongs to.
    pub entity_id: EntityId,
    /// Records still waiting for a successful flush, oldest first.
    pub updates: Vec<MutationRecord>,
    /// True iff `updates` is empty.
    pub synced: bool,
    /// Time of the last network attempt, in epoch milliseconds.
    pub last_attempt: Option<i64>,
    /// Message of the last failed attempt, cleared on success.
    pub error: Option<String>,
    /// Coordinator phase.
    pub phase: SyncPhase,
    /// Records moved to the dead-letter list by this process.
    pub dead_lettered: usize,
}

impl SyncState {
    pub(crate) fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            updates: Vec::new(),
            synced: true,
            last_attempt: None,
            error: None,
            phase: SyncPhase::Idle,
            dead_lettered: 0,
        }
    }

    fn set_updates(&mut self, updates: Vec<MutationRecord>) {
        self.synced = updates.is_empty();
        self.updates = updates;
    }

    /// The persisted queue was loaded after a restart.
    pub(crate) fn hydrated(&mut self, updates: Vec<MutationRecord>) {
        self.set_updates(updates);
    }

    /// A record was appended; `updates` is the queue after the append.
    pub(crate) fn queued(&mut self, updates: Vec<MutationRecord>) {
        self.set_updates(updates);
    }

    /// A flush request is about to be sent with `updates`.
    pub(crate) fn flush_started(&mut self, now: i64, updates: Vec<MutationRecord>) {
        self.set_updates(updates);
        self.last_attempt = Some(now);
        self.phase = SyncPhase::Flushing;
    }

    /// The backend acknowledged a batch; `remaining` was appended meanwhile.
    pub(crate) fn flush_succeeded(&mut self, remaining: Vec<MutationRecord>) {
        self.set_updates(remaining);
        self.error = None;
        self.phase = SyncPhase::Idle;
    }

    /// A flush attempt failed and a retry was scheduled.
    pub(crate) fn flush_failed(&mut self, now: i64, error: String, retry_in: Duration) {
        self.synced = false;
        self.last_attempt = Some(now);
        self.error = Some(error);
        self.phase = SyncPhase::BackoffWait { retry_in };
    }

    /// The queue was found empty when a flush was attempted.
    pub(crate) fn drained(&mut self) {
        self.set_updates(Vec::new());
        self.error = None;
        self.phase = SyncPhase::Idle;
    }

    /// The head record was moved to the dead-letter list.
    pub(crate) fn dead_lettered(&mut self, remaining: Vec<MutationRecord>) {
        self.set_updates(remaining);
        self.dead_lettered += 1;
    }

    /// A scheduled retry found the host offline; the next trigger is the
    /// connectivity signal, not a timer.
    pub(crate) fn waiting_for_network(&mut self) {
        if matches!(self.phase, SyncPhase::BackoffWait { .. }) {
            self.phase = SyncPhase::Idle;
        }
    }
}
