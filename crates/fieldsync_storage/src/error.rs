//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The host store cannot be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored entry could not be parsed.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A conditional write lost against a concurrent writer.
    #[error("revision conflict on {key}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// Key being written.
        key: String,
        /// Revision the writer observed.
        expected: u64,
        /// Revision actually stored.
        actual: u64,
    },

    /// A read-modify-write kept losing against concurrent writers.
    #[error("gave up writing {key} after {attempts} conflicting attempts")]
    Contention {
        /// Key being written.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A queue could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] fieldsync_protocol::ProtocolError),
}

impl StorageError {
    /// Returns true if the host store reported itself unusable.
    ///
    /// Plain I/O errors are not included: they may be transient and the
    /// data behind them may still be there.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_classification() {
        assert!(StorageError::Unavailable("quota".into()).is_unavailable());
        assert!(!StorageError::Io(io::Error::new(io::ErrorKind::Interrupted, "eintr")).is_unavailable());
        assert!(!StorageError::Corrupted("bad magic".into()).is_unavailable());
        assert!(!StorageError::RevisionConflict {
            key: "k".into(),
            expected: 1,
            actual: 2
        }
        .is_unavailable());
    }

    #[test]
    fn conflict_display_names_revisions() {
        let err = StorageError::RevisionConflict {
            key: "offline-queue:J1".into(),
            expected: 3,
            actual: 4,
        };
        let text = err.to_string();
        assert!(text.contains("offline-queue:J1"));
        assert!(text.contains('3') && text.contains('4'));
    }
}
