//! Transport layer abstraction for flush requests.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fieldsync_protocol::{EntityId, FlushRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// A sync transport delivers one flush batch to the backend.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, mock for testing, etc.). A flush either succeeds
/// as a whole or fails as a whole; no per-record outcome is modeled.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends the entire current queue of `entity` in one request.
    async fn flush(&self, entity: &EntityId, request: &FlushRequest) -> SyncResult<()>;
}

/// Scripted result of one mock flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// The backend acknowledges the batch.
    Succeed,
    /// The request fails before reaching the backend.
    Fail(String),
    /// The backend answers with this non-2xx status.
    Status(u16),
}

#[derive(Debug)]
struct MockTransportInner {
    script: VecDeque<MockOutcome>,
    fallback: MockOutcome,
    requests: Vec<(EntityId, FlushRequest)>,
}

/// A mock transport for testing.
///
/// Outcomes are consumed from a script in order; once the script is empty
/// every flush gets the fallback outcome (success by default). Requests
/// can be held in flight with [`MockTransport::hold`] until
/// [`MockTransport::release`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    held: Arc<watch::Sender<bool>>,
}

impl MockTransport {
    /// Creates a mock transport that acknowledges every flush.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                script: VecDeque::new(),
                fallback: MockOutcome::Succeed,
                requests: Vec::new(),
            })),
            held: Arc::new(watch::channel(false).0),
        }
    }

    /// Queues the outcome of the next unscripted flush.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.inner.lock().script.push_back(outcome);
    }

    /// Queues `n` transport failures.
    pub fn fail_next(&self, n: usize, message: &str) {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            inner.script.push_back(MockOutcome::Fail(message.to_string()));
        }
    }

    /// Sets the outcome used once the script is exhausted.
    pub fn set_fallback(&self, outcome: MockOutcome) {
        self.inner.lock().fallback = outcome;
    }

    /// Holds subsequent flushes in flight until [`MockTransport::release`].
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Lets held flushes complete.
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Number of flush requests received.
    pub fn calls(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// All flush requests received, in order.
    pub fn requests(&self) -> Vec<(EntityId, FlushRequest)> {
        self.inner.lock().requests.clone()
    }

    /// The last flush request received.
    pub fn last_request(&self) -> Option<(EntityId, FlushRequest)> {
        self.inner.lock().requests.last().cloned()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn flush(&self, entity: &EntityId, request: &FlushRequest) -> SyncResult<()> {
        self.inner
            .lock()
            .requests
            .push((entity.clone(), request.clone()));

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        let outcome = {
            let mut inner = self.inner.lock();
            let fallback = inner.fallback.clone();
            inner.script.pop_front().unwrap_or(fallback)
        };
        match outcome {
            MockOutcome::Succeed => Ok(()),
            MockOutcome::Fail(message) => Err(SyncError::transport(message)),
            MockOutcome::Status(status) => Err(SyncError::Http {
                status,
                body: String::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::MutationRecord;

    fn batch() -> (EntityId, FlushRequest) {
        (
            EntityId::new("J1").unwrap(),
            FlushRequest::new(vec![MutationRecord::new("status", "done", 1)]),
        )
    }

    #[tokio::test]
    async fn mock_transport_script_then_fallback() {
        let transport = MockTransport::new();
        transport.fail_next(1, "connection reset");
        transport.push_outcome(MockOutcome::Status(500));

        let (job, request) = batch();
        assert!(matches!(
            transport.flush(&job, &request).await,
            Err(SyncError::Transport(_))
        ));
        assert!(matches!(
            transport.flush(&job, &request).await,
            Err(SyncError::Http { status: 500, .. })
        ));
        assert!(transport.flush(&job, &request).await.is_ok());
        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.last_request().unwrap().1, request);
    }

    #[tokio::test]
    async fn mock_transport_fallback_failure() {
        let transport = MockTransport::new();
        transport.set_fallback(MockOutcome::Fail("offline".into()));

        let (job, request) = batch();
        for _ in 0..3 {
            assert!(transport.flush(&job, &request).await.is_err());
        }
    }

    #[tokio::test]
    async fn mock_transport_hold_and_release() {
        let transport = MockTransport::new();
        transport.hold();

        let (job, request) = batch();
        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.flush(&job, &request).await })
        };

        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        transport.release();
        assert!(task.await.unwrap().is_ok());
    }
}
