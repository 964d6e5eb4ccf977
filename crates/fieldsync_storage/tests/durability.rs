//! Durability tests for the queue store across backends and restarts.

use fieldsync_protocol::{EntityId, MutationRecord};
use fieldsync_storage::{FileStore, InMemoryStore, KeyValueStore, QueueStore, QueueStoreOptions};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn record_strategy() -> impl Strategy<Value = MutationRecord> {
    (
        prop::sample::select(vec!["status", "notes", "hours", "photos"]),
        prop_oneof![
            any::<i32>().prop_map(|v| json!(v)),
            "[a-z _]{0,12}".prop_map(|s| json!(s)),
            any::<bool>().prop_map(|b| json!(b)),
        ],
        0i64..4_102_444_800_000,
    )
        .prop_map(|(field, value, ts)| MutationRecord::new(field, value, ts))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn offline_submissions_reload_in_order(records in prop::collection::vec(record_strategy(), 0..24)) {
        let dir = tempdir().unwrap();
        let job = EntityId::new("J1").unwrap();

        runtime().block_on(async {
            let store = QueueStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            for record in &records {
                store.append(&job, record.clone()).await.unwrap();
            }
        });

        // A fresh store over the same directory stands in for an app restart.
        let reloaded = runtime().block_on(async {
            let store = QueueStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            store.load(&job).await.unwrap()
        });

        prop_assert_eq!(reloaded, records);
    }
}

#[tokio::test]
async fn two_contexts_sharing_a_directory_keep_every_append() {
    let dir = tempdir().unwrap();
    let job = EntityId::new("J9").unwrap();

    let open = || {
        Arc::new(QueueStore::with_options(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            QueueStoreOptions::default().with_max_write_attempts(100),
        ))
    };
    let foreground = open();
    let background = open();

    let mut tasks = Vec::new();
    for (n, store) in [foreground.clone(), background.clone()].into_iter().enumerate() {
        let job = job.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20i64 {
                let ts = (n as i64) * 1_000 + i;
                store
                    .append(&job, MutationRecord::new("tick", json!(ts), ts))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let queue = foreground.load(&job).await.unwrap();
    assert_eq!(queue.len(), 40);

    // Each context's own records stay in the order it wrote them.
    for n in 0..2i64 {
        let mine: Vec<i64> = queue
            .iter()
            .map(|r| r.timestamp)
            .filter(|ts| ts / 1_000 == n)
            .collect();
        let expected: Vec<i64> = (0..20).map(|i| n * 1_000 + i).collect();
        assert_eq!(mine, expected);
    }
}

#[tokio::test]
async fn queues_are_isolated_per_entity() {
    let backend = Arc::new(InMemoryStore::new());
    let store = QueueStore::new(backend.clone());
    let j1 = EntityId::new("J1").unwrap();
    let j2 = EntityId::new("J2").unwrap();

    store
        .append(&j1, MutationRecord::new("status", "in_progress", 1))
        .await
        .unwrap();
    store
        .append(&j2, MutationRecord::new("status", "complete", 2))
        .await
        .unwrap();

    assert_eq!(store.load(&j1).await.unwrap()[0].value, json!("in_progress"));
    assert_eq!(store.load(&j2).await.unwrap()[0].value, json!("complete"));
    assert_eq!(backend.keys("offline-queue:").await.unwrap().len(), 2);
}
