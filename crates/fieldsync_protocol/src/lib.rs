//! # FieldSync Protocol
//!
//! Data types shared by the FieldSync offline queue and sync engine.
//!
//! This crate provides:
//! - [`EntityId`] identifying the entity (e.g. a job) a queue belongs to
//! - [`MutationRecord`] for one timestamped field change
//! - [`FlushRequest`], the body sent to the backend on every flush
//! - [`WakeMessage`] delivered from the background execution context
//! - [`Clock`] abstractions for record timestamps
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire Shapes
//!
//! A persisted queue is a JSON array of records:
//!
//! ```json
//! [{ "field": "status", "value": "in_progress", "timestamp": 1700000000000 }]
//! ```
//!
//! A flush request wraps the full current queue:
//!
//! ```json
//! { "updates": [ ... ] }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod entity;
mod error;
mod messages;
mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::EntityId;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{WakeMessage, OFFLINE_QUEUE_SYNC_TAG};
pub use record::{FlushRequest, MutationRecord};
