//! Inspect command implementation.

use super::open_store;
use fieldsync_protocol::EntityId;
use fieldsync_storage::QueueStore;
use serde::Serialize;
use std::path::Path;

/// Queue store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Total pending records.
    pub pending_records: usize,
    /// Total dead-lettered records.
    pub dead_letters: usize,
    /// Per-entity details.
    pub entities: Vec<EntityStats>,
}

/// Queue statistics for one entity.
#[derive(Debug, Serialize)]
pub struct EntityStats {
    /// Entity identifier.
    pub id: String,
    /// Records waiting for a flush.
    pub pending: usize,
    /// Dead-lettered records.
    pub dead_letters: usize,
    /// Capture time of the oldest pending record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<i64>,
    /// Fields touched by pending records, in queue order.
    pub fields: Vec<String>,
}

/// Runs the inspect command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = collect(&store, path).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

async fn collect(store: &QueueStore, path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut ids: Vec<EntityId> = store.pending_entities().await?;
    for id in store.dead_letter_entities().await? {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let mut entities = Vec::with_capacity(ids.len());
    for id in ids {
        let pending = store.load(&id).await?;
        let dead_letters = store.dead_letters(&id).await?.len();
        let mut fields: Vec<String> = Vec::new();
        for record in &pending {
            if !fields.contains(&record.field) {
                fields.push(record.field.clone());
            }
        }
        entities.push(EntityStats {
            id: id.to_string(),
            pending: pending.len(),
            dead_letters,
            oldest: pending.iter().map(|r| r.timestamp).min(),
            fields,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        pending_records: entities.iter().map(|e| e.pending).sum(),
        dead_letters: entities.iter().map(|e| e.dead_letters).sum(),
        entities,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Queue Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Totals:");
    println!("  Pending records: {}", result.pending_records);
    println!("  Dead letters:    {}", result.dead_letters);

    if result.entities.is_empty() {
        println!();
        println!("All queues are drained.");
        return;
    }

    println!();
    println!("Entities:");
    for entity in &result.entities {
        println!(
            "  [{}] {} pending, {} dead-lettered",
            entity.id, entity.pending, entity.dead_letters
        );
        if let Some(oldest) = entity.oldest {
            println!("      oldest: {oldest} ms, fields: {}", entity.fields.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::MutationRecord;

    #[tokio::test]
    async fn collect_reports_pending_and_dead_letters() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        let j1 = EntityId::new("J1").unwrap();
        let j2 = EntityId::new("J2").unwrap();

        store.append(&j2, MutationRecord::new("status", "done", 20)).await.unwrap();
        store.append(&j2, MutationRecord::new("notes", "ok", 10)).await.unwrap();
        store.append(&j1, MutationRecord::new("photo", "bad", 5)).await.unwrap();
        let head = store.load(&j1).await.unwrap().remove(0);
        assert!(store.dead_letter_head(&j1, &head).await.unwrap());

        let result = collect(&store, dir.path()).await.unwrap();
        assert_eq!(result.pending_records, 2);
        assert_eq!(result.dead_letters, 1);
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].id, "J1");
        assert_eq!(result.entities[0].pending, 0);
        assert_eq!(result.entities[1].oldest, Some(10));
        assert_eq!(result.entities[1].fields, vec!["status", "notes"]);
    }
}
