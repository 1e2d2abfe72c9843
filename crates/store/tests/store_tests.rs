//! Integration tests for the result store: idempotence, merge
//! commutativity, flush strategies, and lock-deferred writes.

use std::time::Duration;

use drover_store::{FlushStrategy, LockConfig, Record, ResultStore, StoreConfig};
use serde_json::json;

fn record(value: serde_json::Value) -> Record {
    value.as_object().expect("test record is an object").clone()
}

fn quick_lock() -> LockConfig {
    LockConfig {
        timeout: Duration::from_millis(150),
        poll_interval: Duration::from_millis(10),
        stale_seconds: Duration::from_secs(300),
    }
}

fn immediate_store(dir: &std::path::Path) -> ResultStore {
    ResultStore::new(
        dir,
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Immediate,
            defer_retry_limit: 3,
        },
    )
    .expect("store init")
}

#[tokio::test]
async fn write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = immediate_store(dir.path());
    let rec = record(json!({"title": "T", "plot": "P"}));

    store.write("id1", "m1", "k1", rec.clone()).await.unwrap();
    let first = std::fs::read_to_string(dir.path().join("id1.json")).unwrap();

    store.write("id1", "m1", "k1", rec).await.unwrap();
    let second = std::fs::read_to_string(dir.path().join("id1.json")).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn merge_order_does_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    let a = record(json!({"title": "same", "plot": "A"}));
    let b = record(json!({"title": "same", "plot": "B"}));

    let left_store = immediate_store(&dir.path().join("left"));
    left_store.write("id", "m1", "k1", a.clone()).await.unwrap();
    left_store.write("id", "m2", "k2", b.clone()).await.unwrap();

    let right_store = immediate_store(&dir.path().join("right"));
    right_store.write("id", "m2", "k2", b).await.unwrap();
    right_store.write("id", "m1", "k1", a).await.unwrap();

    let left = std::fs::read_to_string(dir.path().join("left/id.json")).unwrap();
    let right = std::fs::read_to_string(dir.path().join("right/id.json")).unwrap();
    assert_eq!(left, right);
}

#[tokio::test]
async fn result_file_matches_wire_format() {
    let dir = tempfile::tempdir().unwrap();
    let store = immediate_store(dir.path());
    store
        .write("id7", "model-a", "hash1", record(json!({"title": "T", "plot": "P"})))
        .await
        .unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("id7.json")).unwrap())
            .unwrap();
    assert_eq!(doc["title"], "T");
    assert_eq!(doc["llm_models"]["model-a"]["hash1"]["plot"], "P");
    // Title is hoisted, not duplicated inside the record.
    assert!(doc["llm_models"]["model-a"]["hash1"].get("title").is_none());
    // No stale lock or temp files left behind.
    assert!(!dir.path().join("id7.json.lock").exists());
    assert!(!dir.path().join("id7.json.tmp").exists());
}

#[tokio::test]
async fn has_entry_reflects_written_slots() {
    let dir = tempfile::tempdir().unwrap();
    let store = immediate_store(dir.path());
    assert!(!store.has_entry("idX", "m1", "k1"));

    store.write("idX", "m1", "k1", record(json!({"plot": "P"}))).await.unwrap();
    assert!(store.has_entry("idX", "m1", "k1"));
    assert!(!store.has_entry("idX", "m1", "k2"));
}

#[tokio::test]
async fn batched_strategy_defers_until_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(
        dir.path(),
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Batched {
                max_entries: 3,
                max_age: Duration::from_secs(3600),
            },
            defer_retry_limit: 3,
        },
    )
    .unwrap();

    store.write("b1", "m", "k", record(json!({"n": 1}))).await.unwrap();
    store.write("b2", "m", "k", record(json!({"n": 2}))).await.unwrap();
    assert!(!dir.path().join("b1.json").exists());

    // Third write crosses the size threshold and flushes everything.
    store.write("b3", "m", "k", record(json!({"n": 3}))).await.unwrap();
    assert!(dir.path().join("b1.json").exists());
    assert!(dir.path().join("b2.json").exists());
    assert!(dir.path().join("b3.json").exists());
}

#[tokio::test]
async fn batched_flush_groups_writes_per_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(
        dir.path(),
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Batched {
                max_entries: 100,
                max_age: Duration::from_secs(3600),
            },
            defer_retry_limit: 3,
        },
    )
    .unwrap();

    store.write("g1", "m1", "k1", record(json!({"title": "G", "p": 1}))).await.unwrap();
    store.write("g1", "m2", "k1", record(json!({"title": "G", "p": 2}))).await.unwrap();
    store.flush_all().await.unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("g1.json")).unwrap())
            .unwrap();
    assert_eq!(doc["llm_models"]["m1"]["k1"]["p"], 1);
    assert_eq!(doc["llm_models"]["m2"]["k1"]["p"], 2);
}

#[tokio::test]
async fn batched_strategy_flushes_on_age_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(
        dir.path(),
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Batched {
                max_entries: 100,
                max_age: Duration::from_millis(50),
            },
            defer_retry_limit: 3,
        },
    )
    .unwrap();

    store.write("a1", "m", "k", record(json!({"n": 1}))).await.unwrap();
    assert!(!dir.path().join("a1.json").exists());

    tokio::time::sleep(Duration::from_millis(80)).await;

    // The buffer is old enough now; the next write flushes everything.
    store.write("a2", "m", "k", record(json!({"n": 2}))).await.unwrap();
    assert!(dir.path().join("a1.json").exists());
    assert!(dir.path().join("a2.json").exists());
}

#[tokio::test]
async fn fatal_write_keeps_other_buffered_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(
        dir.path(),
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Batched {
                max_entries: 100,
                max_age: Duration::from_secs(3600),
            },
            defer_retry_limit: 3,
        },
    )
    .unwrap();

    // A directory squatting on aaa's result path makes the atomic
    // replace fail with an I/O error.
    std::fs::create_dir(dir.path().join("aaa.json")).unwrap();

    store.write("aaa", "m", "k", record(json!({"p": 1}))).await.unwrap();
    store.write("bbb", "m", "k", record(json!({"p": 2}))).await.unwrap();
    assert!(store.flush_all().await.is_err());
    assert!(!dir.path().join("bbb.json").exists());

    // Clearing the obstruction lets a later flush land every entry
    // that was buffered when the error hit.
    std::fs::remove_dir(dir.path().join("aaa.json")).unwrap();
    store.flush_all().await.unwrap();
    assert!(dir.path().join("aaa.json").is_file());
    assert!(dir.path().join("bbb.json").exists());
}

#[tokio::test]
async fn lock_timeout_defers_write_until_lock_clears() {
    let dir = tempfile::tempdir().unwrap();
    let store = immediate_store(dir.path());

    // A foreign process holds the lock (fresh file, not stale).
    let lock_path = dir.path().join("held.json.lock");
    std::fs::write(&lock_path, "12345").unwrap();

    // Write succeeds at the API level but defers on the lock.
    store.write("held", "m1", "k1", record(json!({"p": 1}))).await.unwrap();
    assert!(!dir.path().join("held.json").exists());

    // Holder goes away; the next flush lands the deferred write.
    std::fs::remove_file(&lock_path).unwrap();
    store.flush_all().await.unwrap();
    assert!(dir.path().join("held.json").exists());
}

#[tokio::test]
async fn deferred_write_is_dropped_after_bounded_retries() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(
        dir.path(),
        StoreConfig {
            lock: quick_lock(),
            strategy: FlushStrategy::Immediate,
            defer_retry_limit: 1,
        },
    )
    .unwrap();

    let lock_path = dir.path().join("stuck.json.lock");
    std::fs::write(&lock_path, "12345").unwrap();

    store.write("stuck", "m1", "k1", record(json!({"p": 1}))).await.unwrap();
    // Two more flush attempts exhaust the single allowed defer retry.
    store.flush_all().await.unwrap();
    store.flush_all().await.unwrap();

    std::fs::remove_file(&lock_path).unwrap();
    store.flush_all().await.unwrap();
    // The write was dropped, not resurrected.
    assert!(!dir.path().join("stuck.json").exists());
}

#[tokio::test]
async fn corrupt_document_is_rebuilt_from_incoming_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = immediate_store(dir.path());
    std::fs::write(dir.path().join("c1.json"), "{ definitely not json").unwrap();

    store.write("c1", "m1", "k1", record(json!({"title": "New", "p": 1}))).await.unwrap();
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("c1.json")).unwrap())
            .unwrap();
    assert_eq!(doc["title"], "New");
}
