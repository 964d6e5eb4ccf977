//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entity identifier was empty or contained only whitespace.
    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),

    /// A wake message carried an unknown tag.
    #[error("unknown wake message type: {0}")]
    UnknownMessage(String),
}
