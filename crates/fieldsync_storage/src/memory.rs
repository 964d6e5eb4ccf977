//! In-memory key/value store for testing.

use crate::backend::{Entry, KeyValueStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key/value store.
///
/// This store keeps everything in process memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - The degraded fallback of [`crate::QueueStore`] when the host store is gone
///
/// # Thread Safety
///
/// The store is thread-safe; the revision check and the write happen under
/// one lock, so conditional writes are atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Overwrites `key` regardless of its revision.
    ///
    /// Simulates another execution context writing underneath.
    #[cfg(any(test, feature = "test-util"))]
    pub fn force_put(&self, key: &str, value: Vec<u8>) -> u64 {
        let mut entries = self.entries.write();
        let revision = entries.get(key).map_or(0, |e| e.revision) + 1;
        entries.insert(key.to_string(), Entry { revision, value });
        revision
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> StorageResult<u64> {
        let mut entries = self.entries.write();
        let actual = entries.get(key).map_or(0, |e| e.revision);
        if actual != expected_revision {
            return Err(StorageError::RevisionConflict {
                key: key.to_string(),
                expected: expected_revision,
                actual,
            });
        }

        let revision = actual + 1;
        entries.insert(key.to_string(), Entry { revision, value });
        Ok(revision)
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = InMemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn put_bumps_revision() {
        let store = InMemoryStore::new();
        assert_eq!(store.put("a", b"one".to_vec(), 0).await.unwrap(), 1);
        assert_eq!(store.put("a", b"two".to_vec(), 1).await.unwrap(), 2);

        let entry = store.get("a").await.unwrap().unwrap();
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.value, b"two");
    }

    #[tokio::test]
    async fn stale_put_is_rejected() {
        let store = InMemoryStore::new();
        store.put("a", b"one".to_vec(), 0).await.unwrap();

        let result = store.put("a", b"stale".to_vec(), 0).await;
        assert!(matches!(
            result,
            Err(StorageError::RevisionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        assert_eq!(store.get("a").await.unwrap().unwrap().value, b"one");
    }

    #[tokio::test]
    async fn force_put_advances_underneath_readers() {
        let store = InMemoryStore::new();
        store.put("a", b"one".to_vec(), 0).await.unwrap();
        assert_eq!(store.force_put("a", b"other".to_vec()), 2);
        assert!(store.put("a", b"mine".to_vec(), 1).await.is_err());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let store = InMemoryStore::new();
        store.put("queue:b", vec![], 0).await.unwrap();
        store.put("queue:a", vec![], 0).await.unwrap();
        store.put("other:a", vec![], 0).await.unwrap();
        store.put("queuf", vec![], 0).await.unwrap();

        assert_eq!(
            store.keys("queue:").await.unwrap(),
            vec!["queue:a".to_string(), "queue:b".to_string()]
        );
        assert_eq!(store.len(), 4);
    }
}
