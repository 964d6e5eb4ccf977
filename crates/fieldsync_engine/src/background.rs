//! Background execution context plumbing.
//!
//! A background context (a service worker, an OS background task) can run
//! while no foreground view is open. It talks to the foreground through
//! two seams:
//!
//! - a [`BackgroundChannel`] carrying [`WakeMessage`]s to whichever
//!   listeners are alive at the time (best-effort, never buffered for
//!   listeners that subscribe later)
//! - a [`WakeRegistrar`] through which the foreground asks the host to run
//!   the background context later, e.g. once connectivity returns

use async_trait::async_trait;
use fieldsync_protocol::{ProtocolResult, WakeMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the wake message channel. Lagging listeners only lose
/// duplicate wake-ups.
const CHANNEL_CAPACITY: usize = 16;

/// Message channel from the background context to live listeners.
#[derive(Debug, Clone)]
pub struct BackgroundChannel {
    tx: broadcast::Sender<WakeMessage>,
}

impl BackgroundChannel {
    /// Creates a channel with no listeners.
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Posts a message to every live listener, returning how many got it.
    pub fn post(&self, message: WakeMessage) -> usize {
        // Err only means nobody is listening.
        let delivered = self.tx.send(message).unwrap_or(0);
        debug!(?message, delivered, "background message posted");
        delivered
    }

    /// Subscribes a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<WakeMessage> {
        self.tx.subscribe()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BackgroundChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// The background execution context.
///
/// When the host runs it for a registered tag, it asks every live
/// listener to flush.
#[derive(Debug, Clone)]
pub struct BackgroundWorker {
    channel: BackgroundChannel,
}

impl BackgroundWorker {
    /// Creates a worker posting to `channel`.
    pub fn new(channel: BackgroundChannel) -> Self {
        Self { channel }
    }

    /// Handles a host sync event for `tag`.
    ///
    /// Returns the number of listeners reached.
    ///
    /// # Errors
    ///
    /// Returns an error for tags this worker does not know.
    pub fn handle_sync_event(&self, tag: &str) -> ProtocolResult<usize> {
        let message = WakeMessage::for_tag(tag)?;
        Ok(self.channel.post(message))
    }
}

/// Host capability to schedule the background context for later.
#[async_trait]
pub trait WakeRegistrar: Send + Sync {
    /// Returns true if the host supports background-wake registration.
    fn is_supported(&self) -> bool {
        true
    }

    /// Asks the host to run the background context for `tag` at an
    /// opportune moment.
    async fn register(&self, tag: &str) -> Result<(), String>;
}

/// Registrar for hosts without background wake support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

#[async_trait]
impl WakeRegistrar for NoopRegistrar {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(&self, _tag: &str) -> Result<(), String> {
        Ok(())
    }
}

/// An in-process registrar standing in for the host scheduler.
///
/// Registrations of the same tag coalesce, as host schedulers do.
/// [`MemoryRegistrar::fire`] plays the host deciding it is time to run the
/// background context.
#[derive(Debug, Clone)]
pub struct MemoryRegistrar {
    pending: Arc<Mutex<Vec<String>>>,
    worker: BackgroundWorker,
}

impl MemoryRegistrar {
    /// Creates a registrar that wakes `worker` when fired.
    pub fn new(worker: BackgroundWorker) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            worker,
        }
    }

    /// Tags currently registered.
    pub fn registered(&self) -> Vec<String> {
        self.pending.lock().clone()
    }

    /// Runs the background context for every registered tag and clears the
    /// registrations. Returns the total number of listeners reached.
    pub fn fire(&self) -> usize {
        let tags = std::mem::take(&mut *self.pending.lock());
        tags.iter()
            .filter_map(|tag| self.worker.handle_sync_event(tag).ok())
            .sum()
    }
}

#[async_trait]
impl WakeRegistrar for MemoryRegistrar {
    async fn register(&self, tag: &str) -> Result<(), String> {
        let mut pending = self.pending.lock();
        if !pending.iter().any(|t| t == tag) {
            pending.push(tag.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::OFFLINE_QUEUE_SYNC_TAG;

    #[test]
    fn post_reaches_only_live_listeners() {
        let channel = BackgroundChannel::new();
        assert_eq!(channel.post(WakeMessage::SyncRequested), 0);

        let mut first = channel.subscribe();
        let second = channel.subscribe();
        assert_eq!(channel.listener_count(), 2);
        drop(second);

        assert_eq!(channel.post(WakeMessage::SyncRequested), 1);
        assert_eq!(first.try_recv().unwrap(), WakeMessage::SyncRequested);

        // A late subscriber does not see earlier messages.
        let mut late = channel.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn worker_rejects_unknown_tags() {
        let worker = BackgroundWorker::new(BackgroundChannel::new());
        assert_eq!(worker.handle_sync_event(OFFLINE_QUEUE_SYNC_TAG).unwrap(), 0);
        assert!(worker.handle_sync_event("nightly-report").is_err());
    }

    #[tokio::test]
    async fn memory_registrar_coalesces_and_fires() {
        let channel = BackgroundChannel::new();
        let registrar = MemoryRegistrar::new(BackgroundWorker::new(channel.clone()));
        let mut listener = channel.subscribe();

        registrar.register(OFFLINE_QUEUE_SYNC_TAG).await.unwrap();
        registrar.register(OFFLINE_QUEUE_SYNC_TAG).await.unwrap();
        assert_eq!(registrar.registered(), vec![OFFLINE_QUEUE_SYNC_TAG.to_string()]);

        assert_eq!(registrar.fire(), 1);
        assert_eq!(listener.recv().await.unwrap(), WakeMessage::SyncRequested);
        assert!(registrar.registered().is_empty());
    }

    #[tokio::test]
    async fn noop_registrar_is_unsupported() {
        assert!(!NoopRegistrar.is_supported());
        assert!(NoopRegistrar.register(OFFLINE_QUEUE_SYNC_TAG).await.is_ok());
    }
}
