// ABOUTME: Snapshot store integration tests over the public API
// ABOUTME: Directory layout, discovery hygiene, watermark lifecycle, streaming reads

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use snapshot_replicator::snapshot::{SnapshotStore, WATERMARK_FILE};
use snapshot_replicator::store::Record;
use std::fs;
use tempfile::tempdir;

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, hour, 0, 0).unwrap()
}

fn record(id: u64) -> Record {
    json!({"id": id, "payload": {"nested": [1, 2, 3]}})
        .as_object()
        .unwrap()
        .clone()
}

#[test]
fn test_multi_model_layout_and_discovery() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());

    for model in ["orders", "users"] {
        let mut pending = store.create_snapshot(model, ts(9)).unwrap();
        pending.write_page(&[record(1), record(2)]).unwrap();
        pending.commit().unwrap();
    }

    assert_eq!(store.discovered_models().unwrap(), vec!["orders", "users"]);
    assert!(dir
        .path()
        .join("orders/2024-06-10T09_00_00.000Z.json")
        .exists());
}

#[test]
fn test_streaming_read_preserves_order_and_content() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());

    let mut pending = store.create_snapshot("orders", ts(9)).unwrap();
    pending.write_page(&[record(1)]).unwrap();
    pending.write_page(&[record(2), record(3)]).unwrap();
    assert_eq!(pending.commit().unwrap(), 3);

    let mut reader = store.open_snapshot("orders", ts(9)).unwrap();
    let mut ids = Vec::new();
    while let Some(rec) = reader.next_record().unwrap() {
        assert_eq!(rec["payload"], json!({"nested": [1, 2, 3]}));
        ids.push(rec["id"].as_u64().unwrap());
    }
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_watermark_lifecycle_drives_pending_set() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    for hour in [9, 10, 11] {
        store
            .create_snapshot("orders", ts(hour))
            .unwrap()
            .commit()
            .unwrap();
    }

    // No watermark: everything is pending, oldest first
    assert_eq!(
        store.snapshots_after("orders", None).unwrap(),
        vec![ts(9), ts(10), ts(11)]
    );

    store.write_watermark("orders", ts(10)).unwrap();
    assert_eq!(store.read_watermark("orders").unwrap(), Some(ts(10)));
    assert_eq!(
        store
            .snapshots_after("orders", store.read_watermark("orders").unwrap())
            .unwrap(),
        vec![ts(11)]
    );
}

#[test]
fn test_discovery_ignores_foreign_files() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    store
        .create_snapshot("orders", ts(9))
        .unwrap()
        .commit()
        .unwrap();

    fs::write(dir.path().join("orders/README.json"), "not a snapshot").unwrap();
    fs::write(dir.path().join("orders").join(WATERMARK_FILE), "junk").unwrap();
    fs::write(dir.path().join("stray.txt"), "not a model dir").unwrap();

    assert_eq!(store.list_snapshots("orders").unwrap(), vec![ts(9)]);
    assert_eq!(store.discovered_models().unwrap(), vec!["orders"]);
}

#[test]
fn test_abandoned_extraction_leaves_no_snapshot() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());

    {
        let mut pending = store.create_snapshot("orders", ts(9)).unwrap();
        pending.write_page(&[record(1)]).unwrap();
        // Dropped without commit, as if the process died mid-extraction
    }

    assert!(store.list_snapshots("orders").unwrap().is_empty());
    assert_eq!(store.latest_snapshot("orders").unwrap(), None);
}

#[test]
fn test_recommit_replaces_snapshot_atomically() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());

    let mut pending = store.create_snapshot("orders", ts(9)).unwrap();
    pending.write_page(&[record(1)]).unwrap();
    pending.commit().unwrap();

    // Re-running an extraction with the same `now` replaces the same file
    let mut pending = store.create_snapshot("orders", ts(9)).unwrap();
    pending.write_page(&[record(1), record(2)]).unwrap();
    pending.commit().unwrap();

    assert_eq!(store.list_snapshots("orders").unwrap(), vec![ts(9)]);
    assert_eq!(store.count_records("orders", ts(9)).unwrap(), 2);
}
