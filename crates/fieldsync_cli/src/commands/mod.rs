//! CLI command implementations.

pub mod dead_letters;
pub mod enqueue;
pub mod flush;
pub mod inspect;

use fieldsync_storage::{FileStore, QueueStore};
use std::path::Path;
use std::sync::Arc;

/// Opens the queue store in `path`, creating the directory if needed.
pub fn open_store(path: &Path) -> Result<Arc<QueueStore>, Box<dyn std::error::Error>> {
    let backend = FileStore::open(path)?;
    Ok(Arc::new(QueueStore::new(Arc::new(backend))))
}
