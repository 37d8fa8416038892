//! Durable store tests
//!
//! Caching, default materialization, corruption reporting, dirty-tracked
//! saves, crash-tolerant writes and the per-key ordering guarantees.

use module_runtime::{DurableStore, StoreError, TaskQueue};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    hits: u64,
    label: String,
}

fn fresh_store(dir: &std::path::Path) -> DurableStore {
    DurableStore::new(dir, TaskQueue::new())
}

#[tokio::test]
async fn get_materializes_and_caches_the_default() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    let first: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(first, Counter::default());
    // A bare get never touches the disk.
    assert!(!dir.path().join("counter.yaml").exists());

    // Cached: a file appearing behind the cache's back is not observed.
    std::fs::write(dir.path().join("counter.yaml"), "hits: 99\nlabel: disk\n").unwrap();
    let second: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(second, Counter::default());
}

#[tokio::test]
async fn get_deserializes_an_existing_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("counter.yaml"), "hits: 3\nlabel: disk\n").unwrap();

    let store = fresh_store(dir.path());
    let value: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(
        value,
        Counter {
            hits: 3,
            label: "disk".to_string()
        }
    );
}

#[tokio::test]
async fn get_reports_corrupt_records() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("bad.yaml"), "{unclosed").unwrap();

    let store = fresh_store(dir.path());
    let err = store
        .get::<Counter, _>("bad", Counter::default)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CorruptRecord { .. }));

    // A parseable file of the wrong shape is corrupt too.
    std::fs::write(dir.path().join("shape.yaml"), "just a string\n").unwrap();
    let err = store
        .get::<Counter, _>("shape", Counter::default)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CorruptRecord { .. }));
}

#[tokio::test]
async fn modify_then_save_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    // modify returns immediately; the following save is ordered behind it
    // on the same per-key queue.
    let _ = store.modify("counter", Counter::default, |c: &mut Counter| {
        c.hits += 1;
        c.label = "persisted".to_string();
    });
    store.save("counter", false).await.unwrap().unwrap();

    // A fresh store over the same directory models a process restart.
    let reread: Counter = fresh_store(dir.path())
        .get("counter", Counter::default)
        .await
        .unwrap();
    assert_eq!(
        reread,
        Counter {
            hits: 1,
            label: "persisted".to_string()
        }
    );
}

#[tokio::test]
async fn save_on_a_clean_record_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    let _: Counter = store.get("counter", Counter::default).await.unwrap();
    store.save("counter", false).await.unwrap().unwrap();
    assert!(!dir.path().join("counter.yaml").exists());
}

#[tokio::test]
async fn save_with_evict_drops_the_cached_value() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    let _ = store.modify("counter", Counter::default, |c: &mut Counter| c.hits = 1);
    store.save("counter", true).await.unwrap().unwrap();

    // The cache was evicted, so the next get re-reads the file.
    std::fs::write(dir.path().join("counter.yaml"), "hits: 42\nlabel: disk\n").unwrap();
    let reread: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(reread.hits, 42);
}

#[tokio::test]
async fn reset_discards_unsaved_changes() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    store
        .modify("counter", Counter::default, |c: &mut Counter| c.hits = 9)
        .await
        .unwrap()
        .unwrap();
    store.reset("counter");

    // Nothing dirty remains to save, and a fresh get re-materializes the
    // default.
    store.save("counter", false).await.unwrap().unwrap();
    assert!(!dir.path().join("counter.yaml").exists());
    let value: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(value, Counter::default());
}

#[tokio::test]
async fn modifications_apply_in_submission_order() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    for i in 0..20u64 {
        let _ = store.modify("seq", Vec::new, move |v: &mut Vec<u64>| v.push(i));
    }
    store.save("seq", false).await.unwrap().unwrap();

    let reread: Vec<u64> = fresh_store(dir.path()).get("seq", Vec::new).await.unwrap();
    assert_eq!(reread, (0..20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn nested_keys_create_directories() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    let key = "log/group-1/2026-08/05";
    let _ = store.modify(key, Vec::new, |v: &mut Vec<String>| {
        v.push("hello".to_string())
    });
    store.save(key, false).await.unwrap().unwrap();

    assert!(dir.path().join("log/group-1/2026-08/05.yaml").exists());
}

#[tokio::test]
async fn path_escaping_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    for key in ["", "/etc/passwd", "../escape", "log/../../escape"] {
        let err = store
            .get::<Counter, _>(key, Counter::default)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)), "key {key:?}");

        let err = store.save(key, false).await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)), "key {key:?}");
    }
}

#[tokio::test]
async fn failed_save_keeps_the_record_dirty_for_retry() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    // A directory squatting on the record's path makes the rename fail.
    std::fs::create_dir_all(dir.path().join("blocked.yaml")).unwrap();

    let _ = store.modify("blocked", Counter::default, |c: &mut Counter| c.hits = 7);
    let err = store.save("blocked", false).await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Persistence { .. }));

    // Unblock and retry: the record is still dirty, so the save writes.
    std::fs::remove_dir(dir.path().join("blocked.yaml")).unwrap();
    store.save("blocked", false).await.unwrap().unwrap();

    let reread: Counter = fresh_store(dir.path())
        .get("blocked", Counter::default)
        .await
        .unwrap();
    assert_eq!(reread.hits, 7);
}

#[tokio::test]
async fn bare_get_observes_the_pre_mutation_snapshot() {
    // A bare get is served from the cache without queueing, so it may see
    // the value from before a still-queued modify. That window is part of
    // the contract: get is a best-effort snapshot, not read-your-writes.
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::new();
    let store = DurableStore::new(dir.path(), queue.clone());

    let _: Counter = store.get("counter", Counter::default).await.unwrap();

    // Park the record's queue behind a gate, then queue a mutation.
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let gate = queue.submit("store/counter", async move {
        let _ = gate_rx.await;
    });
    let mutation = store.modify("counter", Counter::default, |c: &mut Counter| c.hits = 1);

    let stale: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(stale.hits, 0);

    gate_tx.send(()).unwrap();
    gate.await.unwrap();
    mutation.await.unwrap().unwrap();

    let fresh: Counter = store.get("counter", Counter::default).await.unwrap();
    assert_eq!(fresh.hits, 1);
}

#[tokio::test]
async fn save_all_flushes_every_dirty_record() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(dir.path());

    store
        .modify("a", Counter::default, |c: &mut Counter| c.hits = 1)
        .await
        .unwrap()
        .unwrap();
    store
        .modify("nested/b", Counter::default, |c: &mut Counter| c.hits = 2)
        .await
        .unwrap()
        .unwrap();
    // A clean record must not produce a file.
    let _: Counter = store.get("clean", Counter::default).await.unwrap();

    store.save_all().await.unwrap();

    assert!(dir.path().join("a.yaml").exists());
    assert!(dir.path().join("nested/b.yaml").exists());
    assert!(!dir.path().join("clean.yaml").exists());
}
