//! Error types for the sync engine.

use fieldsync_protocol::ProtocolError;
use fieldsync_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Every flush failure is retried regardless of its kind; the
/// classification in [`SyncError::is_retryable`] is diagnostic only.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("server responded {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The flush request did not complete within the request timeout.
    #[error("flush timed out after {0:?}")]
    Timeout(Duration),

    /// Durable queue store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The owning service has been disposed.
    #[error("sync service disposed")]
    Disposed,
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns true if this error is likely transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            SyncError::Storage(e) => !matches!(
                e,
                StorageError::Corrupted(_) | StorageError::Codec(_)
            ),
            SyncError::Protocol(_) | SyncError::Disposed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport("connection reset").is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(SyncError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 422,
            body: "bad field".into()
        }
        .is_retryable());
        assert!(!SyncError::Disposed.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Http {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "server responded 502: bad gateway");
        assert_eq!(
            SyncError::transport("dns lookup failed").to_string(),
            "transport error: dns lookup failed"
        );
    }
}
