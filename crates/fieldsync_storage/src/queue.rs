//! The durable per-entity mutation queue.

use crate::backend::{Entry, KeyValueStore};
use crate::error::{StorageError, StorageResult};
use crate::memory::InMemoryStore;
use fieldsync_protocol::{EntityId, MutationRecord};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Key prefix of persisted queues.
pub const QUEUE_KEY_PREFIX: &str = "offline-queue:";

/// Key prefix of dead-lettered records.
pub const DEAD_LETTER_KEY_PREFIX: &str = "offline-dead-letter:";

/// Options for a [`QueueStore`].
#[derive(Debug, Clone)]
pub struct QueueStoreOptions {
    /// Prefix prepended to the entity id to form the queue key.
    pub queue_prefix: String,
    /// Prefix prepended to the entity id to form the dead-letter key.
    pub dead_letter_prefix: String,
    /// Attempts a read-modify-write makes before giving up on contention.
    pub max_write_attempts: u32,
}

impl QueueStoreOptions {
    /// Sets the queue key prefix.
    pub fn with_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    /// Sets the dead-letter key prefix.
    pub fn with_dead_letter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dead_letter_prefix = prefix.into();
        self
    }

    /// Sets the number of read-modify-write attempts.
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts;
        self
    }
}

impl Default for QueueStoreOptions {
    fn default() -> Self {
        Self {
            queue_prefix: QUEUE_KEY_PREFIX.to_string(),
            dead_letter_prefix: DEAD_LETTER_KEY_PREFIX.to_string(),
            max_write_attempts: 8,
        }
    }
}

/// A queue as read from the store, with the revision it was read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    /// Revision of the persisted entry (0 if it has never been written).
    pub revision: u64,
    /// Pending records in insertion order.
    pub records: Vec<MutationRecord>,
}

impl QueueSnapshot {
    /// Returns true if no records are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The Durable Queue Store.
///
/// Holds, per entity, the ordered list of mutation records that the
/// backend has not acknowledged yet. The persisted value is a JSON array of
/// records stored under `queue_prefix + entity_id`.
///
/// # Invariants
///
/// - A missing queue loads as empty; `load` never fails with "not found"
/// - Insertion order is preserved
/// - Every mutation is a conditional write on the revision it read, retried
///   from a fresh read on conflict, so concurrent appends from another
///   execution context are never overwritten
///
/// # Degraded Mode
///
/// If the host store reports [`StorageError::Unavailable`] for a key it has
/// never been seen holding, that key moves to an in-memory store for the
/// lifetime of the queue store and keeps accepting records. Records written
/// there do not survive a restart; [`QueueStore::is_degraded`] reports the
/// condition. Keys the host store does hold never fall back: their errors,
/// like every plain I/O error, reach the caller.
pub struct QueueStore {
    primary: Arc<dyn KeyValueStore>,
    fallback: InMemoryStore,
    degraded: AtomicBool,
    primary_keys: Mutex<HashSet<String>>,
    options: QueueStoreOptions,
}

impl QueueStore {
    /// Creates a queue store over `backend` with default options.
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_options(backend, QueueStoreOptions::default())
    }

    /// Creates a queue store over `backend`.
    pub fn with_options(backend: Arc<dyn KeyValueStore>, options: QueueStoreOptions) -> Self {
        Self {
            primary: backend,
            fallback: InMemoryStore::new(),
            degraded: AtomicBool::new(false),
            primary_keys: Mutex::new(HashSet::new()),
            options,
        }
    }

    /// Returns the store options.
    pub fn options(&self) -> &QueueStoreOptions {
        &self.options
    }

    /// Returns true once some queue had to be kept in memory.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Returns the storage key of an entity's queue.
    pub fn queue_key(&self, entity: &EntityId) -> String {
        format!("{}{}", self.options.queue_prefix, entity)
    }

    fn dead_letter_key(&self, entity: &EntityId) -> String {
        format!("{}{}", self.options.dead_letter_prefix, entity)
    }

    // Routing between the host store and the in-memory fallback.
    //
    // A key lives in exactly one place. Keys the host store has been seen
    // holding stay there: errors on them propagate instead of falling back,
    // so a pending queue on disk is never shadowed by an empty one in
    // memory. Only keys the host store never held move to the fallback, and
    // only when the host store reports itself unavailable.

    fn degrade(&self, cause: &StorageError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            error!(error = %cause, "host storage unavailable, new queues continue in memory");
        }
    }

    fn held_by_primary(&self, key: &str) -> bool {
        self.primary_keys.lock().contains(key)
    }

    fn mark_primary(&self, key: &str) {
        self.primary_keys.lock().insert(key.to_string());
    }

    async fn in_fallback(&self, key: &str) -> StorageResult<bool> {
        Ok(self.is_degraded() && self.fallback.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        if self.in_fallback(key).await? {
            return self.fallback.get(key).await;
        }
        match self.primary.get(key).await {
            Ok(entry) => {
                if entry.is_some() {
                    self.mark_primary(key);
                }
                Ok(entry)
            }
            Err(e) if e.is_unavailable() && !self.held_by_primary(key) => {
                self.degrade(&e);
                self.fallback.get(key).await
            }
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> StorageResult<u64> {
        if self.in_fallback(key).await? {
            return self.fallback.put(key, value, expected_revision).await;
        }
        match self.primary.put(key, value.clone(), expected_revision).await {
            Ok(revision) => {
                self.mark_primary(key);
                Ok(revision)
            }
            Err(e) if e.is_unavailable() && !self.held_by_primary(key) => {
                self.degrade(&e);
                self.fallback.put(key, value, expected_revision).await
            }
            Err(e) => Err(e),
        }
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = match self.primary.keys(prefix).await {
            Ok(keys) => {
                for key in &keys {
                    self.mark_primary(key);
                }
                keys
            }
            Err(e) if e.is_unavailable() => {
                self.degrade(&e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if self.is_degraded() {
            for key in self.fallback.keys(prefix).await? {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            keys.sort();
        }
        Ok(keys)
    }

    async fn read_key(&self, key: &str) -> StorageResult<QueueSnapshot> {
        match self.get(key).await? {
            Some(entry) => Ok(QueueSnapshot {
                revision: entry.revision,
                records: MutationRecord::decode_queue(&entry.value)?,
            }),
            None => Ok(QueueSnapshot::default()),
        }
    }

    async fn update_key<F, R>(&self, key: &str, mut f: F) -> StorageResult<(R, QueueSnapshot)>
    where
        F: FnMut(&mut Vec<MutationRecord>) -> R + Send,
        R: Send,
    {
        let attempts = self.options.max_write_attempts.max(1);
        for attempt in 1..=attempts {
            let mut snapshot = self.read_key(key).await?;
            let before = snapshot.records.clone();
            let out = f(&mut snapshot.records);
            if snapshot.records == before {
                return Ok((out, snapshot));
            }

            let bytes = MutationRecord::encode_queue(&snapshot.records)?;
            match self.put(key, bytes, snapshot.revision).await {
                Ok(revision) => {
                    snapshot.revision = revision;
                    return Ok((out, snapshot));
                }
                Err(StorageError::RevisionConflict {
                    expected, actual, ..
                }) => {
                    debug!(key, attempt, expected, actual, "queue changed underneath, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(key, attempts, "giving up on contended queue write");
        Err(StorageError::Contention {
            key: key.to_string(),
            attempts,
        })
    }

    async fn entities_under(&self, prefix: &str) -> StorageResult<Vec<EntityId>> {
        let mut entities = Vec::new();
        for key in self.keys(prefix).await? {
            if self.read_key(&key).await?.is_empty() {
                continue;
            }
            match EntityId::new(&key[prefix.len()..]) {
                Ok(id) => entities.push(id),
                Err(e) => warn!(key = %key, error = %e, "skipping queue with unusable key"),
            }
        }
        Ok(entities)
    }

    /// Reads an entity's queue together with its revision.
    pub async fn snapshot(&self, entity: &EntityId) -> StorageResult<QueueSnapshot> {
        self.read_key(&self.queue_key(entity)).await
    }

    /// Returns the persisted queue for an entity, empty if none exists.
    pub async fn load(&self, entity: &EntityId) -> StorageResult<Vec<MutationRecord>> {
        Ok(self.snapshot(entity).await?.records)
    }

    /// Replaces the persisted queue of an entity in one write.
    ///
    /// Returns the new revision.
    pub async fn save(
        &self,
        entity: &EntityId,
        records: Vec<MutationRecord>,
    ) -> StorageResult<u64> {
        let ((), snapshot) = self
            .update_key(&self.queue_key(entity), |queue| *queue = records.clone())
            .await?;
        Ok(snapshot.revision)
    }

    /// Applies `f` to the queue in a conditional read-modify-write.
    ///
    /// On a revision conflict the queue is re-read and `f` applied again,
    /// so `f` may run more than once. Returns `f`'s output from the attempt
    /// that was written, and the resulting snapshot.
    pub async fn update<F, R>(&self, entity: &EntityId, f: F) -> StorageResult<(R, QueueSnapshot)>
    where
        F: FnMut(&mut Vec<MutationRecord>) -> R + Send,
        R: Send,
    {
        self.update_key(&self.queue_key(entity), f).await
    }

    /// Appends one record to the end of an entity's queue.
    pub async fn append(
        &self,
        entity: &EntityId,
        record: MutationRecord,
    ) -> StorageResult<QueueSnapshot> {
        let ((), snapshot) = self
            .update(entity, |queue| queue.push(record.clone()))
            .await?;
        Ok(snapshot)
    }

    /// Removes records acknowledged by the backend.
    ///
    /// `sent` is the batch that was flushed. The longest prefix of the queue
    /// that matches the tail of `sent` is dropped; records appended after
    /// the batch was read stay queued. Returns how many records were
    /// removed and the remaining queue.
    pub async fn remove_acknowledged(
        &self,
        entity: &EntityId,
        sent: &[MutationRecord],
    ) -> StorageResult<(usize, QueueSnapshot)> {
        self.update(entity, |queue| {
            let n = acknowledged_prefix(queue, sent);
            queue.drain(..n);
            n
        })
        .await
    }

    /// Lists entities whose persisted queue is non-empty.
    pub async fn pending_entities(&self) -> StorageResult<Vec<EntityId>> {
        let prefix = self.options.queue_prefix.clone();
        self.entities_under(&prefix).await
    }

    /// Returns the dead-lettered records of an entity.
    pub async fn dead_letters(&self, entity: &EntityId) -> StorageResult<Vec<MutationRecord>> {
        Ok(self.read_key(&self.dead_letter_key(entity)).await?.records)
    }

    /// Lists entities that have dead-lettered records.
    pub async fn dead_letter_entities(&self) -> StorageResult<Vec<EntityId>> {
        let prefix = self.options.dead_letter_prefix.clone();
        self.entities_under(&prefix).await
    }

    /// Moves the head of an entity's queue to its dead-letter list.
    ///
    /// Nothing happens if the current head is no longer `head` (another
    /// context flushed or moved it). The record is written to the
    /// dead-letter list before it leaves the queue, so a crash in between
    /// leaves a duplicate rather than a loss.
    pub async fn dead_letter_head(
        &self,
        entity: &EntityId,
        head: &MutationRecord,
    ) -> StorageResult<bool> {
        if self.load(entity).await?.first() != Some(head) {
            return Ok(false);
        }

        self.update_key(&self.dead_letter_key(entity), |letters| {
            letters.push(head.clone())
        })
        .await?;

        let (removed, _) = self
            .update(entity, |queue| {
                if queue.first() == Some(head) {
                    queue.remove(0);
                    true
                } else {
                    false
                }
            })
            .await?;
        Ok(removed)
    }

    /// Deletes all dead-lettered records of an entity, returning how many.
    pub async fn clear_dead_letters(&self, entity: &EntityId) -> StorageResult<usize> {
        let (count, _) = self
            .update_key(&self.dead_letter_key(entity), |letters| {
                let n = letters.len();
                letters.clear();
                n
            })
            .await?;
        Ok(count)
    }
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("options", &self.options)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

/// Length of the longest queue prefix equal to a suffix of `sent`.
fn acknowledged_prefix(queue: &[MutationRecord], sent: &[MutationRecord]) -> usize {
    let max = queue.len().min(sent.len());
    (0..=max)
        .rev()
        .find(|&j| queue[..j] == sent[sent.len() - j..])
        .unwrap_or(0)
}
