//! # FieldSync Engine
//!
//! Offline-first mutation queue synchronization for field installers.
//!
//! This crate provides:
//! - Per-entity sync coordinator (single-flight flush, exponential backoff)
//! - Transport abstraction with an HTTP transport and a scripted mock
//! - Connectivity monitor and background-wake plumbing
//! - Wake bridge turning "back online" and background messages into flushes
//! - Entity sync views, the application-facing façade
//! - [`SyncService`] owning all of the above with an `init`/`dispose` lifecycle
//!
//! ## Architecture
//!
//! ```text
//! submit_update ─► QueueStore (append) ─► coordinator.attempt_flush()
//!                                              │
//!            WakeBridge ── online / wake msg ──┘
//!                                              ▼
//!                      QueueStore ─► transport (one batch) ─► QueueStore
//!                                              │
//!                                              ▼
//!                                      EntitySyncView state
//! ```
//!
//! ## Key Invariants
//!
//! - A record leaves the queue only after a flush that carried it succeeded
//! - At most one flush per entity is in flight
//! - Failures never reach the caller of `submit_update`; they become
//!   retries with exponential backoff (1s doubling to 60s by default)
//! - Backoff resets only on success
//! - Retries are unbounded; nothing is dropped unless dead-lettering is
//!   explicitly configured

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod backoff;
mod bridge;
mod config;
mod connectivity;
mod coordinator;
mod error;
mod http;
mod service;
mod state;
mod transport;
mod view;

pub use background::{
    BackgroundChannel, BackgroundWorker, MemoryRegistrar, NoopRegistrar, WakeRegistrar,
};
pub use backoff::Backoff;
pub use bridge::{FlushTarget, Trigger, WakeBridge};
pub use config::{BackoffConfig, SyncConfig, ENTITY_ID_PLACEHOLDER};
pub use connectivity::NetworkMonitor;
pub use coordinator::{EntityCoordinator, FlushOutcome, SkipReason};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport};
pub use service::{SyncService, SyncServiceBuilder};
pub use state::{SyncPhase, SyncState};
pub use transport::{MockOutcome, MockTransport, SyncTransport};
pub use view::EntitySyncView;
