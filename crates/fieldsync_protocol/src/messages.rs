//! Messages exchanged with the background execution context.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Tag under which a background-wake task is registered with the host.
///
/// When the host later runs the background context for this tag, the
/// context asks every live listener to flush its offline queues.
pub const OFFLINE_QUEUE_SYNC_TAG: &str = "offline-queue-sync";

/// Message posted by the background execution context to live listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WakeMessage {
    /// The background context asks listeners to flush offline queues now.
    #[serde(rename = "OFFLINE_QUEUE_SYNC")]
    SyncRequested,
}

impl WakeMessage {
    /// Maps a background-wake registration tag to the message it produces.
    pub fn for_tag(tag: &str) -> ProtocolResult<Self> {
        match tag {
            OFFLINE_QUEUE_SYNC_TAG => Ok(WakeMessage::SyncRequested),
            other => Err(ProtocolError::UnknownMessage(other.to_string())),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_requested_wire_format() {
        let encoded = WakeMessage::SyncRequested.encode().unwrap();
        assert_eq!(encoded, r#"{"type":"OFFLINE_QUEUE_SYNC"}"#);
        assert_eq!(
            WakeMessage::decode(&encoded).unwrap(),
            WakeMessage::SyncRequested
        );
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(
            WakeMessage::for_tag(OFFLINE_QUEUE_SYNC_TAG).unwrap(),
            WakeMessage::SyncRequested
        );
        assert!(matches!(
            WakeMessage::for_tag("periodic-refresh"),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(WakeMessage::decode(r#"{"type":"SOMETHING_ELSE"}"#).is_err());
    }
}
