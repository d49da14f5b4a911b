//! Tests for version assignment and ingest
//!
//! These tests verify:
//! - Versions start at 0 and strictly increase per object
//! - Racing ingests never share a version
//! - Re-ingesting a job key is idempotent for the same object and a
//!   `DuplicateJobKey` for any other, including while the first ingest is
//!   still in flight
//! - Writes are visible to point reads as soon as they return

use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use versionkv::index::ClaimOutcome;
use versionkv::{Config, Engine, IndexEntry, OperationKind, VkvError};

use crate::common::{drain, record, setup_engine, version_list};

#[test]
fn test_versions_start_at_zero_and_increase() {
    let engine = setup_engine();

    assert_eq!(engine.next_version("doc").unwrap(), 0);
    for expected in 0..5u64 {
        let rec = engine
            .ingest("doc", "job-1", &format!("r{}", expected), &b"data"[..])
            .unwrap();
        assert_eq!(rec.version_node, expected);
    }
    assert_eq!(engine.next_version("doc").unwrap(), 5);

    // Other objects have their own sequence
    assert_eq!(engine.ingest("other", "job-1", "x", &b""[..]).unwrap().version_node, 0);
}

#[test]
fn test_ingest_visible_to_get_immediately() {
    let engine = setup_engine();
    let rec = engine.ingest("doc", "job", "r", &b"hello"[..]).unwrap();

    let got = engine.get("doc", rec.version_node).unwrap().unwrap();
    assert_eq!(got, rec);
    assert_eq!(&got.payload[..], b"hello");
}

#[test]
fn test_two_racing_ingests_get_consecutive_versions() {
    let engine = setup_engine();
    for v in 0..=3u64 {
        engine.ingest("race", "setup", &format!("s{}", v), &b""[..]).unwrap();
    }

    let barrier = Barrier::new(2);
    let versions: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let engine = &engine;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    engine
                        .ingest("race", "racers", &format!("t{}", i), &b""[..])
                        .unwrap()
                        .version_node
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let got: HashSet<u64> = versions.into_iter().collect();
    assert_eq!(got, HashSet::from([4, 5]));
    assert_eq!(version_list(&engine, "race"), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_many_racing_ingests_never_share_a_version() {
    let engine = setup_engine();
    let threads = 8;
    let per_thread = 10;
    let barrier = Barrier::new(threads);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let engine = &engine;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    (0..per_thread)
                        .map(|i| engine.ingest("hot", "hot-job", &format!("{}-{}", t, i), &b""[..]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for result in results {
        match result {
            Ok(rec) => assert!(seen.insert(rec.version_node), "version reused"),
            // Losing twice in a row is reported, never silently retried
            Err(VkvError::Conflict { object_key, .. }) => assert_eq!(object_key, "hot"),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    let mut stored = version_list(&engine, "hot");
    let mut expected: Vec<_> = seen.into_iter().collect();
    expected.sort_unstable();
    stored.sort_unstable();
    assert_eq!(stored, expected);
}

#[test]
fn test_reingest_same_object_is_idempotent() {
    let engine = setup_engine();
    let first = engine.ingest("doc", "job", "r1", &b"one"[..]).unwrap();

    // Before and after the index entry lands
    let again = engine.ingest("doc", "job", "r1", &b"ignored"[..]).unwrap();
    assert_eq!(again, first);
    drain(&engine);
    let again = engine.ingest("doc", "job", "r1", &b"ignored"[..]).unwrap();
    assert_eq!(again, first);

    assert_eq!(version_list(&engine, "doc"), vec![0]);
}

#[test]
fn test_job_key_owned_by_other_object_is_rejected() {
    let engine = setup_engine();
    engine.ingest("a", "job", "r1", &b""[..]).unwrap();

    match engine.ingest("b", "job", "r1", &b""[..]) {
        Err(VkvError::DuplicateJobKey { existing, .. }) => {
            assert_eq!(existing.object_key, "a");
            assert_eq!(existing.version_node, 0);
        }
        other => panic!("expected DuplicateJobKey, got {:?}", other),
    }
    assert_eq!(engine.next_version("b").unwrap(), 0);
}

#[test]
fn test_reingest_while_first_ingest_in_flight() {
    let engine = setup_engine();
    let first = record("a", 0, "job", "r1");

    // An ingest that has claimed the job key but whose put has not returned
    let entry = IndexEntry::for_record(&first);
    let claim = match engine.index().try_claim(&entry, |_| false).unwrap() {
        ClaimOutcome::Claimed(claim) => claim,
        other => panic!("expected a fresh claim, got {:?}", other),
    };

    assert!(matches!(
        engine.ingest("a", "job", "r1", &b""[..]),
        Err(VkvError::Conflict { .. })
    ));
    match engine.ingest("b", "job", "r1", &b""[..]) {
        Err(VkvError::DuplicateJobKey { existing, .. }) => assert_eq!(existing, first.primary_ref()),
        other => panic!("expected DuplicateJobKey, got {:?}", other),
    }

    // Its put lands; the claim is not committed yet
    engine.store().put(first.clone(), None).unwrap();
    assert_eq!(engine.ingest("a", "job", "r1", &b"retry"[..]).unwrap(), first);
    assert!(matches!(
        engine.ingest("b", "job", "r1", &b""[..]),
        Err(VkvError::DuplicateJobKey { .. })
    ));

    claim.commit();
    assert_eq!(engine.ingest("a", "job", "r1", &b"retry"[..]).unwrap(), first);
    assert_eq!(version_list(&engine, "a"), vec![0]);
    assert_eq!(engine.next_version("b").unwrap(), 0);
}

#[test]
fn test_failed_ingest_releases_job_key() {
    let config = Config::builder()
        .refill_interval_ms(60_000)
        .table_throughput(1_000, 1)
        .index_throughput(1_000, 1_000)
        .build();
    let engine = Engine::open(config).unwrap();
    engine.ingest("a", "job", "r1", &b""[..]).unwrap();

    assert!(matches!(
        engine.ingest("b", "job", "r2", &b""[..]),
        Err(VkvError::Throttled { .. })
    ));
    assert_eq!(engine.index().claimant("job", "r2").unwrap(), None);

    // Another object can take the job key once budget returns
    engine.admission().replenish(Duration::from_secs(1));
    assert_eq!(engine.ingest("c", "job", "r2", &b""[..]).unwrap().object_key, "c");
}

#[test]
fn test_racing_reingests_share_one_version() {
    let engine = setup_engine();

    for round in 0..20 {
        let range = format!("r{}", round);
        let barrier = Barrier::new(2);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (engine, barrier, range) = (&engine, &barrier, &range);
                    s.spawn(move || {
                        barrier.wait();
                        engine.ingest("doc", "job", range, &b""[..])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut written = HashSet::new();
        for result in results {
            match result {
                Ok(rec) => {
                    written.insert(rec.version_node);
                }
                // The other ingest still held the job key
                Err(VkvError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(written.len(), 1, "round {} wrote {:?}", round, written);
    }

    assert_eq!(version_list(&engine, "doc"), (0..20).collect::<Vec<u64>>());
    drain(&engine);
    assert!(engine.dead_letters().is_empty());
}

#[test]
fn test_racing_objects_cannot_share_a_job_key() {
    let engine = setup_engine();

    for round in 0..20 {
        let range = format!("r{}", round);
        let barrier = Barrier::new(2);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = ["a", "b"]
                .into_iter()
                .map(|object_key| {
                    let (engine, barrier, range) = (&engine, &barrier, &range);
                    s.spawn(move || {
                        barrier.wait();
                        engine.ingest(object_key, "job", range, &b""[..])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(VkvError::DuplicateJobKey { .. })))
            .count();
        assert_eq!((winners, duplicates), (1, 1), "round {}", round);
    }

    drain(&engine);
    assert!(engine.dead_letters().is_empty());
    assert_eq!(engine.index().len(), 20);
}

#[test]
fn test_job_key_reusable_after_owner_deleted() {
    let engine = setup_engine();
    engine.ingest("a", "job", "r1", &b""[..]).unwrap();
    drain(&engine);
    engine.delete("a", 0).unwrap();

    let rec = engine.ingest("b", "job", "r1", &b""[..]).unwrap();
    assert_eq!(rec.object_key, "b");
    drain(&engine);

    assert_eq!(crate::common::job_refs(&engine, "job", "r1", "r1"), vec!["b@0"]);
    assert!(engine.dead_letters().is_empty());
}

#[test]
fn test_deleted_versions_are_not_reissued() {
    let engine = setup_engine();
    engine.ingest("doc", "job", "r0", &b""[..]).unwrap();
    engine.ingest("doc", "job", "r1", &b""[..]).unwrap();
    engine.delete("doc", 1).unwrap();

    let rec = engine.ingest("doc", "job", "r2", &b""[..]).unwrap();
    assert_eq!(rec.version_node, 2);
}

#[test]
fn test_invalid_keys_rejected_before_any_write() {
    let engine = setup_engine();

    assert!(matches!(engine.ingest("", "job", "r", &b""[..]), Err(VkvError::Encoding(_))));
    assert!(matches!(engine.ingest("doc", "", "r", &b""[..]), Err(VkvError::Encoding(_))));
    assert!(matches!(
        engine.ingest("doc", "job", &"r".repeat(1025), &b""[..]),
        Err(VkvError::Encoding(_))
    ));
    assert_eq!(engine.stats().records, 0);
}

#[test]
fn test_version_overflow() {
    let engine = setup_engine();
    engine.put(record("max", u64::MAX, "job", "top"), None).unwrap();

    assert!(matches!(engine.next_version("max"), Err(VkvError::Encoding(_))));
    assert!(matches!(engine.ingest("max", "job", "next", &b""[..]), Err(VkvError::Encoding(_))));
}

#[test]
fn test_put_with_expected_prior() {
    let engine = setup_engine();
    engine.put(record("doc", 0, "job", "a"), None).unwrap();
    engine.put(record("doc", 1, "job", "b"), Some(0)).unwrap();

    assert!(matches!(
        engine.put(record("doc", 2, "job", "c"), Some(0)),
        Err(VkvError::Conflict { .. })
    ));
    assert!(matches!(
        engine.put(record("doc", 1, "job", "d"), None),
        Err(VkvError::Conflict { .. })
    ));
}

#[test]
fn test_sixteenth_write_is_throttled() {
    // Long tick so the bucket cannot refill during the test
    let config = Config::builder()
        .refill_interval_ms(60_000)
        .index_throughput(1_000, 1_000)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..15 {
        engine.ingest(&format!("obj-{}", i), "job", &format!("r{}", i), &b""[..]).unwrap();
    }

    let err = engine.ingest("obj-15", "job", "r15", &b""[..]).unwrap_err();
    match &err {
        VkvError::Throttled { kind, retry_after } => {
            assert_eq!(*kind, OperationKind::TableWrite);
            assert!(*retry_after >= Duration::from_millis(60_000));
        }
        other => panic!("expected Throttled, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(engine.stats().records, 15);

    // Raising capacity and refilling lets writes through again
    engine.set_capacity(OperationKind::TableWrite, 100).unwrap();
    engine.admission().replenish(Duration::from_secs(1));
    engine.ingest("obj-15", "job", "r15", &b""[..]).unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let config = Config::builder().table_throughput(0, 15).build();
    assert!(matches!(Engine::open(config), Err(VkvError::InvalidConfig(_))));
}
