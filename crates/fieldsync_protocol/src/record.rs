//! Mutation records and flush batches.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One discrete change to an entity, captured at submission time.
///
/// Records are immutable once created. Ownership moves into the queue
/// store on enqueue and the record lives until a flush covering it is
/// acknowledged by the backend.
///
/// # Fields
///
/// - `field`: name of the changed field (e.g. `"status"`)
/// - `value`: the new value, any JSON value
/// - `timestamp`: capture time in milliseconds since the Unix epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Name of the changed field.
    pub field: String,
    /// New value of the field.
    pub value: Value,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl MutationRecord {
    /// Creates a new record.
    pub fn new(field: impl Into<String>, value: impl Into<Value>, timestamp: i64) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Encodes a queue of records as the persisted JSON array.
    pub fn encode_queue(records: &[MutationRecord]) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(records)?)
    }

    /// Decodes a persisted JSON array of records.
    pub fn decode_queue(bytes: &[u8]) -> ProtocolResult<Vec<MutationRecord>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Request body of a flush: the entire current queue of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushRequest {
    /// Pending records, in insertion order.
    pub updates: Vec<MutationRecord>,
}

impl FlushRequest {
    /// Creates a flush request carrying `updates`.
    pub fn new(updates: Vec<MutationRecord>) -> Self {
        Self { updates }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Returns true if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Encodes the request as a JSON body.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a request from a JSON body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
