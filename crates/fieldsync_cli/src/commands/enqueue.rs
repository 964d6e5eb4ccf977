//! Enqueue command implementation.

use super::open_store;
use fieldsync_protocol::{Clock, EntityId, MutationRecord, SystemClock};
use serde_json::Value;
use std::path::Path;

/// Runs the enqueue command.
///
/// Appends straight to the durable queue; nothing is sent. A running
/// application picks the record up on its next flush.
pub async fn run(
    path: &Path,
    entity: &str,
    field: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entity = EntityId::new(entity)?;
    let store = open_store(path)?;

    let record = MutationRecord::new(field, parse_value(value), SystemClock.now_millis());
    let snapshot = store.append(&entity, record.clone()).await?;

    println!(
        "Queued {}.{} = {} ({} pending)",
        entity,
        record.field,
        record.value,
        snapshot.records.len()
    );
    Ok(())
}

/// Parses `raw` as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
