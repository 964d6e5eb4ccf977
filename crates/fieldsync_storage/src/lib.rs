//! # FieldSync Storage
//!
//! Durable storage for the FieldSync offline mutation queue.
//!
//! This crate has two layers:
//!
//! - [`KeyValueStore`] - the host-provided durable key/value store. Values
//!   are **opaque bytes** stamped with a monotonic revision, and every write
//!   is conditional on the revision the writer last observed.
//! - [`QueueStore`] - the queue of pending [`MutationRecord`]s per entity,
//!   built on top of any [`KeyValueStore`].
//!
//! ## Design Principles
//!
//! - Backends never interpret values
//! - Writes are compare-and-swap on the entry revision, so two execution
//!   contexts sharing one store cannot silently clobber each other's appends
//! - A missing queue is an empty queue
//! - If the host store becomes unavailable the queue store keeps working
//!   from memory (see [`QueueStore::is_degraded`])
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral queues
//! - [`FileStore`] - One file per key, shared safely between processes
//!
//! ## Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use fieldsync_protocol::{EntityId, MutationRecord};
//! use fieldsync_storage::{InMemoryStore, QueueStore};
//! use std::sync::Arc;
//!
//! let store = QueueStore::new(Arc::new(InMemoryStore::new()));
//! let job = EntityId::new("J1").unwrap();
//! store.append(&job, MutationRecord::new("status", "in_progress", 1)).await.unwrap();
//! assert_eq!(store.load(&job).await.unwrap().len(), 1);
//! # }
//! ```
//!
//! [`MutationRecord`]: fieldsync_protocol::MutationRecord

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod queue;

pub use backend::{Entry, KeyValueStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use queue::{
    QueueSnapshot, QueueStore, QueueStoreOptions, DEAD_LETTER_KEY_PREFIX, QUEUE_KEY_PREFIX,
};
