//! Key/value store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;

/// A stored value together with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Revision of the entry. Starts at 1 and grows by one on every write.
    pub revision: u64,
    /// Opaque value bytes.
    pub value: Vec<u8>,
}

/// The host-provided durable key/value store.
///
/// Stores are **opaque byte maps** with revision stamps. They do not know
/// about queues, records or JSON.
///
/// # Invariants
///
/// - An absent key has revision 0
/// - `put` succeeds only if `expected_revision` equals the stored revision,
///   and returns the new revision (`expected_revision + 1`)
/// - A successful `put` is durable when it returns
/// - Stores must be `Send + Sync`; the API is async because host I/O may be
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the entry stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the entry is corrupted.
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>>;

    /// Writes `value` under `key` if the stored revision is `expected_revision`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RevisionConflict`](crate::StorageError::RevisionConflict)
    /// if another writer got there first, or an I/O error.
    async fn put(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> StorageResult<u64>;

    /// Lists all keys starting with `prefix`, in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
