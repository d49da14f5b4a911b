//! Tests for PrimaryStore
//!
//! These tests verify:
//! - Conditional puts never overwrite and respect `expected_prior`
//! - Deleted versions are never reissued
//! - Version scans are ordered, bounded and restartable
//! - WAL replay and checkpoint restore the same state

use bytes::Bytes;
use tempfile::TempDir;
use versionkv::config::{Config, WalSyncStrategy};
use versionkv::store::{PrimaryStore, VersionCursor};
use versionkv::{ObjectVersion, PrimaryRef, VkvError};

// =============================================================================
// Helper Functions
// =============================================================================

fn record(object_key: &str, version_node: u64) -> ObjectVersion {
    ObjectVersion {
        object_key: object_key.to_string(),
        version_node,
        ingest_job_hash: "job".to_string(),
        ingest_job_range: format!("{}#{}", object_key, version_node),
        payload: Bytes::from(format!("v{}", version_node)),
    }
}

fn durable_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .partitions(4)
        .build()
}

fn versions(store: &PrimaryStore, object_key: &str) -> Vec<u64> {
    store
        .scan_versions(&VersionCursor::new(object_key, 0, u64::MAX), usize::MAX)
        .unwrap()
        .items
        .iter()
        .map(|r| r.version_node)
        .collect()
}

// =============================================================================
// Conditional Put Tests
// =============================================================================

#[test]
fn test_put_then_get() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 0), None).unwrap();

    assert_eq!(store.get("a", 0).unwrap(), Some(record("a", 0)));
    assert_eq!(store.get("a", 1).unwrap(), None);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_put_never_overwrites() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 0), None).unwrap();

    let mut other = record("a", 0);
    other.payload = Bytes::from_static(b"different");

    match store.put(other, None) {
        Err(VkvError::Conflict {
            object_key,
            version_node,
        }) => {
            assert_eq!(object_key, "a");
            assert_eq!(version_node, 0);
        }
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert_eq!(store.get("a", 0).unwrap(), Some(record("a", 0)));
}

#[test]
fn test_put_below_latest_conflicts() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 5), None).unwrap();

    assert!(matches!(store.put(record("a", 3), None), Err(VkvError::Conflict { .. })));
    store.put(record("a", 6), None).unwrap();
}

#[test]
fn test_expected_prior() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 0), None).unwrap();
    store.put(record("a", 1), Some(0)).unwrap();

    // Latest is now 1, not 0
    assert!(matches!(store.put(record("a", 2), Some(0)), Err(VkvError::Conflict { .. })));
    store.put(record("a", 2), Some(1)).unwrap();

    // Expecting a prior on an object with no history fails
    assert!(matches!(store.put(record("b", 0), Some(0)), Err(VkvError::Conflict { .. })));
}

#[test]
fn test_invalid_keys_rejected() {
    let store = PrimaryStore::in_memory(4);
    assert!(matches!(store.put(record("", 0), None), Err(VkvError::Encoding(_))));

    let mut bad_job = record("a", 0);
    bad_job.ingest_job_range = String::new();
    assert!(matches!(store.put(bad_job, None), Err(VkvError::Encoding(_))));
    assert!(store.is_empty());
}

// =============================================================================
// Delete and High-Water Tests
// =============================================================================

#[test]
fn test_delete() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 0), None).unwrap();

    assert_eq!(store.delete("a", 0).unwrap(), Some(record("a", 0)));
    assert_eq!(store.get("a", 0).unwrap(), None);
    assert!(!store.contains(&PrimaryRef::new("a", 0)));

    // Deleting again is a no-op
    assert_eq!(store.delete("a", 0).unwrap(), None);
}

#[test]
fn test_deleted_latest_is_not_reused() {
    let store = PrimaryStore::in_memory(4);
    store.put(record("a", 0), None).unwrap();
    store.put(record("a", 1), None).unwrap();
    store.delete("a", 1).unwrap();

    assert_eq!(store.latest_version("a").unwrap(), Some(1));
    assert!(matches!(store.put(record("a", 1), None), Err(VkvError::Conflict { .. })));
    store.put(record("a", 2), Some(1)).unwrap();
}

#[test]
fn test_latest_version_unknown_object() {
    let store = PrimaryStore::in_memory(4);
    assert_eq!(store.latest_version("nobody").unwrap(), None);
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_is_ascending_and_isolated() {
    let store = PrimaryStore::in_memory(1);
    for v in [0, 1, 2, 10, 300] {
        store.put(record("a", v), None).unwrap();
    }
    // Neighbouring keys that share a textual prefix
    store.put(record("ab", 0), None).unwrap();
    store.put(record("a\0", 0), None).unwrap();

    assert_eq!(versions(&store, "a"), vec![0, 1, 2, 10, 300]);
}

#[test]
fn test_scan_bounds_inclusive() {
    let store = PrimaryStore::in_memory(4);
    for v in 0..10 {
        store.put(record("a", v), None).unwrap();
    }

    let page = store
        .scan_versions(&VersionCursor::new("a", 3, 6), 100)
        .unwrap();
    let got: Vec<_> = page.items.iter().map(|r| r.version_node).collect();
    assert_eq!(got, vec![3, 4, 5, 6]);
    assert!(page.next.is_none());

    // Inverted range is empty
    let page = store.scan_versions(&VersionCursor::new("a", 7, 2), 100).unwrap();
    assert!(page.items.is_empty());
}

#[test]
fn test_scan_pages_resume() {
    let store = PrimaryStore::in_memory(4);
    for v in 0..7 {
        store.put(record("a", v), None).unwrap();
    }

    let mut cursor = Some(VersionCursor::new("a", 0, u64::MAX));
    let mut pages = Vec::new();
    while let Some(c) = cursor {
        let page = store.scan_versions(&c, 3).unwrap();
        pages.push(page.items.iter().map(|r| r.version_node).collect::<Vec<_>>());
        cursor = page.next;
    }

    assert_eq!(pages, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
}

// =============================================================================
// Durability Tests
// =============================================================================

#[test]
fn test_in_memory_store_is_not_durable() {
    let store = PrimaryStore::in_memory(2);
    assert!(!store.is_durable());
    assert_eq!(store.checkpoint().unwrap(), 0);
}

#[test]
fn test_reopen_replays_wal() {
    let dir = TempDir::new().unwrap();
    {
        let (store, recovery) = PrimaryStore::open(&durable_config(&dir)).unwrap();
        assert!(recovery.is_none());
        for v in 0..5 {
            store.put(record("a", v), None).unwrap();
        }
        store.put(record("b", 0), None).unwrap();
        store.delete("a", 4).unwrap();
    }

    let (store, recovery) = PrimaryStore::open(&durable_config(&dir)).unwrap();
    let recovery = recovery.unwrap();
    assert_eq!(recovery.entries_recovered, 7);
    assert!(!recovery.was_truncated);

    assert_eq!(versions(&store, "a"), vec![0, 1, 2, 3]);
    assert_eq!(store.latest_version("a").unwrap(), Some(4));
    assert_eq!(store.get("b", 0).unwrap(), Some(record("b", 0)));
}

#[test]
fn test_checkpoint_keeps_live_state_and_marks() {
    let dir = TempDir::new().unwrap();
    {
        let (store, _) = PrimaryStore::open(&durable_config(&dir)).unwrap();
        for v in 0..4 {
            store.put(record("a", v), None).unwrap();
        }
        store.put(record("gone", 0), None).unwrap();
        store.put(record("gone", 1), None).unwrap();
        store.delete("gone", 0).unwrap();
        store.delete("gone", 1).unwrap();
        store.delete("a", 3).unwrap();

        // 3 live "a" records, plus reservations for "a"@3 and "gone"@1
        assert_eq!(store.checkpoint().unwrap(), 5);
    }

    let (store, recovery) = PrimaryStore::open(&durable_config(&dir)).unwrap();
    assert_eq!(recovery.unwrap().entries_recovered, 5);
    assert_eq!(versions(&store, "a"), vec![0, 1, 2]);
    assert_eq!(store.latest_version("a").unwrap(), Some(3));
    assert_eq!(store.latest_version("gone").unwrap(), Some(1));
    assert!(matches!(store.put(record("gone", 1), None), Err(VkvError::Conflict { .. })));
}

#[test]
fn test_snapshot_lists_all_partitions() {
    let store = PrimaryStore::in_memory(8);
    for i in 0..20 {
        store.put(record(&format!("obj-{}", i), 0), None).unwrap();
    }

    let mut keys: Vec<_> = store.snapshot().into_iter().map(|r| r.object_key).collect();
    keys.sort();
    assert_eq!(keys.len(), 20);
    assert_eq!(store.partition_count(), 8);
}
