//! Dead-letters command implementation.

use super::open_store;
use fieldsync_protocol::EntityId;
use std::path::Path;

/// Runs the dead-letters command.
pub async fn run(path: &Path, entity: &str, clear: bool) -> Result<(), Box<dyn std::error::Error>> {
    let entity = EntityId::new(entity)?;
    let store = open_store(path)?;

    if clear {
        let removed = store.clear_dead_letters(&entity).await?;
        println!("Cleared {removed} dead-lettered record(s) for {entity}");
        return Ok(());
    }

    let letters = store.dead_letters(&entity).await?;
    if letters.is_empty() {
        println!("No dead-lettered records for {entity}");
        return Ok(());
    }
    for record in letters {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
