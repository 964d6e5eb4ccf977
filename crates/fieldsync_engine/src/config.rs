//! Configuration for the sync engine.

use fieldsync_protocol::EntityId;
use fieldsync_storage::QueueStoreOptions;
use std::time::Duration;

/// Placeholder replaced by the entity id in [`SyncConfig::endpoint`].
pub const ENTITY_ID_PLACEHOLDER: &str = "{entity_id}";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Flush endpoint template, e.g. `https://api.example.com/jobs/{entity_id}/sync`.
    pub endpoint: String,
    /// Upper bound on one flush request, distinct from the backoff timer.
    pub request_timeout: Duration,
    /// Backoff between failed attempts.
    pub backoff: BackoffConfig,
    /// Consecutive failures after which the head record of a queue is moved
    /// to the dead-letter list. `None` retries the whole batch forever.
    pub dead_letter_after: Option<u32>,
    /// Queue store key layout and write retry budget.
    pub queue: QueueStoreOptions,
}

impl SyncConfig {
    /// Creates a new sync configuration for the given endpoint template.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            dead_letter_after: None,
            queue: QueueStoreOptions::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables dead-lettering after `failures` consecutive failed flushes.
    pub fn with_dead_letter_after(mut self, failures: u32) -> Self {
        self.dead_letter_after = Some(failures.max(1));
        self
    }

    /// Sets the queue store options.
    pub fn with_queue_options(mut self, queue: QueueStoreOptions) -> Self {
        self.queue = queue;
        self
    }

    /// Renders the flush endpoint for an entity.
    pub fn endpoint_for(&self, entity: &EntityId) -> String {
        self.endpoint
            .replace(ENTITY_ID_PLACEHOLDER, entity.as_str())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure, and after every success.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied after each failure.
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
            multiplier: 2.0,
        }
    }
}
