//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Clean logs replay completely
//! - Torn tails and corrupted frames stop replay and are truncated
//! - `verify` reports the same findings without touching the file

use std::fs::{self, File, OpenOptions};
use std::io::Write;

use versionkv::wal::{Operation, WalEntry, WalRecovery};

use crate::common::{put, setup_temp_wal, write_puts};

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert!(entries.is_empty());
    assert_eq!(result, Default::default());
}

#[test]
fn test_recover_clean_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_puts(&wal_path, 10);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 10);
    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 10);
    assert!(!result.was_truncated);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.lsn, i as u64 + 1);
    }
}

#[test]
fn test_recover_torn_header() {
    let (_temp, wal_path) = setup_temp_wal();
    write_puts(&wal_path, 2);
    let clean_len = fs::metadata(&wal_path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0u8; 8]).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(result.entries_corrupted, 0);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), clean_len);
}

#[test]
fn test_recover_torn_body() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = WalEntry::new(1, put("obj", 0)).serialize().unwrap();
    let mut torn = WalEntry::new(2, put("obj", 1)).serialize().unwrap();
    torn.truncate(20);

    let mut file = File::create(&wal_path).unwrap();
    file.write_all(&good).unwrap();
    file.write_all(&torn).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good.len() as u64);
}

#[test]
fn test_recover_stops_at_corrupted_frame() {
    let (_temp, wal_path) = setup_temp_wal();
    let first = WalEntry::new(1, put("obj", 0)).serialize().unwrap();
    let mut second = WalEntry::new(2, put("obj", 1)).serialize().unwrap();
    let third = WalEntry::new(3, put("obj", 2)).serialize().unwrap();
    let last = second.len() - 1;
    second[last] ^= 0xFF;

    let mut file = File::create(&wal_path).unwrap();
    file.write_all(&first).unwrap();
    file.write_all(&second).unwrap();
    file.write_all(&third).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    // Nothing after the first bad frame is trusted
    assert_eq!(entries.len(), 1);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), first.len() as u64);
}

#[test]
fn test_recover_preserves_operation_order() {
    let (_temp, wal_path) = setup_temp_wal();
    let ops = vec![
        put("obj", 0),
        Operation::Delete {
            object_key: "obj".to_string(),
            version_node: 0,
        },
        Operation::Reserve {
            object_key: "obj".to_string(),
            version_node: 0,
        },
    ];

    let mut file = File::create(&wal_path).unwrap();
    for (i, op) in ops.iter().enumerate() {
        file.write_all(&WalEntry::new(i as u64 + 1, op.clone()).serialize().unwrap())
            .unwrap();
    }
    drop(file);

    let (entries, _) = WalRecovery::recover(&wal_path).unwrap();
    let recovered: Vec<_> = entries.into_iter().map(|e| e.operation).collect();
    assert_eq!(recovered, ops);
}

#[test]
fn test_verify_does_not_truncate() {
    let (_temp, wal_path) = setup_temp_wal();
    write_puts(&wal_path, 3);

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);
    let damaged_len = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();
    assert_eq!(result.entries_recovered, 3);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), damaged_len);
}

#[test]
fn test_recover_missing_file_is_error() {
    let (_temp, wal_path) = setup_temp_wal();
    assert!(WalRecovery::recover(&wal_path).is_err());
}
