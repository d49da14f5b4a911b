//! Primary store
//!
//! Partitioned, optionally WAL-backed storage for object-versions.

use std::fs;
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};

use crate::codec;
use crate::config::Config;
use crate::error::{Result, VkvError};
use crate::wal::{Operation, RecoveryResult, WalRecovery, WalWriter};

use super::partition::Partition;
use super::{ObjectVersion, Page, PrimaryRef, VersionCursor};

/// Holds every committed object-version
///
/// ## Concurrency:
/// - Each partition has its own RwLock; writers on object-keys in different
///   partitions never contend
/// - Conditional checks and the insert happen under one partition write
///   lock, so two racing puts for the same version cannot both succeed
/// - The WAL mutex is only taken while a partition lock is held (lock order:
///   partition → WAL)
pub struct PrimaryStore {
    partitions: Vec<RwLock<Partition>>,

    /// Write-ahead log, present when a data directory is configured
    wal: Option<Mutex<WalWriter>>,
}

impl PrimaryStore {
    const WAL_FILENAME: &'static str = "versions.wal";

    /// Create a store that keeps everything in memory
    pub fn in_memory(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1))
                .map(|_| RwLock::new(Partition::default()))
                .collect(),
            wal: None,
        }
    }

    /// Open a store for `config`, replaying the WAL if one exists
    ///
    /// Returns recovery stats when a WAL was replayed.
    pub fn open(config: &Config) -> Result<(Self, Option<RecoveryResult>)> {
        let mut store = Self::in_memory(config.partitions);

        let data_dir = match &config.data_dir {
            Some(dir) => dir,
            None => return Ok((store, None)),
        };

        fs::create_dir_all(data_dir)?;
        let wal_path = Self::wal_path(data_dir);

        let recovery = if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            for entry in entries {
                store.replay(entry.operation)?;
            }
            Some(result)
        } else {
            None
        };

        store.wal = Some(Mutex::new(WalWriter::open(
            &wal_path,
            config.wal_sync_strategy,
        )?));

        Ok((store, recovery))
    }

    /// WAL location inside a data directory
    pub fn wal_path(data_dir: &std::path::Path) -> PathBuf {
        data_dir.join(Self::WAL_FILENAME)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Conditionally insert a new object-version
    ///
    /// Fails with `Conflict` when a record already exists at the key, when
    /// the version does not exceed the object's high-water mark, or when
    /// `expected_prior` is given and differs from the current latest version.
    /// Never overwrites.
    pub fn put(&self, record: ObjectVersion, expected_prior: Option<u64>) -> Result<()> {
        let key = codec::encode_primary(&record.object_key, record.version_node)?;
        codec::encode_index(&record.ingest_job_hash, &record.ingest_job_range)?;

        let mut partition = self.partition(&record.object_key).write();
        let latest = Self::latest_in(&partition, &record.object_key)?;

        let stale = latest.map_or(false, |v| record.version_node <= v);
        let unexpected = expected_prior.map_or(false, |expected| latest != Some(expected));

        if stale || unexpected || partition.contains(&key) {
            return Err(VkvError::Conflict {
                object_key: record.object_key,
                version_node: record.version_node,
            });
        }

        self.log(Operation::Put {
            record: record.clone(),
        })?;
        partition.insert(key, record);

        Ok(())
    }

    /// Remove a record, returning it if it existed
    ///
    /// The object's high-water mark is kept, so the version is never reused.
    pub fn delete(&self, object_key: &str, version_node: u64) -> Result<Option<ObjectVersion>> {
        let key = codec::encode_primary(object_key, version_node)?;
        let mut partition = self.partition(object_key).write();

        if !partition.contains(&key) {
            return Ok(None);
        }

        self.log(Operation::Delete {
            object_key: object_key.to_string(),
            version_node,
        })?;

        Ok(partition.remove(&key))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point read
    pub fn get(&self, object_key: &str, version_node: u64) -> Result<Option<ObjectVersion>> {
        let key = codec::encode_primary(object_key, version_node)?;
        Ok(self.partition(object_key).read().get(&key).cloned())
    }

    /// Whether the record behind a back-reference is live
    pub fn contains(&self, primary: &PrimaryRef) -> bool {
        match codec::encode_primary(&primary.object_key, primary.version_node) {
            Ok(key) => self.partition(&primary.object_key).read().contains(&key),
            Err(_) => false,
        }
    }

    /// Highest version ever committed for `object_key`
    ///
    /// Includes versions that have since been deleted.
    pub fn latest_version(&self, object_key: &str) -> Result<Option<u64>> {
        let partition = self.partition(object_key).read();
        Self::latest_in(&partition, object_key)
    }

    /// Read one page of an object's versions, ascending
    pub fn scan_versions(
        &self,
        cursor: &VersionCursor,
        limit: usize,
    ) -> Result<Page<ObjectVersion, VersionCursor>> {
        let limit = limit.max(1);
        let start = codec::encode_primary(&cursor.object_key, cursor.next_version)?;
        let end = codec::encode_primary(&cursor.object_key, cursor.to_version)?;

        let items = self
            .partition(&cursor.object_key)
            .read()
            .range(&start, &end, limit);

        let next = match items.last() {
            Some(last) if items.len() >= limit && last.version_node < cursor.to_version => {
                Some(VersionCursor {
                    object_key: cursor.object_key.clone(),
                    next_version: last.version_node + 1,
                    to_version: cursor.to_version,
                })
            }
            _ => None,
        };

        Ok(Page { items, next })
    }

    /// Copy of every live record (unordered across partitions)
    pub fn snapshot(&self) -> Vec<ObjectVersion> {
        let mut out = Vec::with_capacity(self.len());
        for partition in &self.partitions {
            out.extend(partition.read().records().cloned());
        }
        out
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Rewrite the WAL so it holds only live records and high-water marks
    ///
    /// Returns the number of entries written; a no-op without a WAL.
    pub fn checkpoint(&self) -> Result<u64> {
        let wal = match &self.wal {
            Some(wal) => wal,
            None => return Ok(0),
        };

        // Partition locks first, then the WAL, matching the write path.
        let guards: Vec<_> = self.partitions.iter().map(|p| p.read()).collect();

        let mut operations = Vec::new();
        for partition in &guards {
            operations.extend(partition.records().map(|record| Operation::Put {
                record: record.clone(),
            }));
            operations.extend(partition.purged_marks().into_iter().map(
                |(object_key, version_node)| Operation::Reserve {
                    object_key,
                    version_node,
                },
            ));
        }

        let written = wal.lock().rewrite(operations)?;
        tracing::info!("Checkpointed WAL with {} entries", written);
        Ok(written)
    }

    /// Flush and fsync the WAL
    pub fn sync(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.lock().sync()?;
        }
        Ok(())
    }

    pub fn is_durable(&self) -> bool {
        self.wal.is_some()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of live records
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn partition(&self, object_key: &str) -> &RwLock<Partition> {
        let hash = crc32fast::hash(object_key.as_bytes()) as usize;
        &self.partitions[hash % self.partitions.len()]
    }

    /// Last element of the object's ordered range, or its high-water mark
    fn latest_in(partition: &Partition, object_key: &str) -> Result<Option<u64>> {
        let start = codec::encode_primary(object_key, 0)?;
        let end = codec::encode_primary(object_key, u64::MAX)?;
        let live = partition.last_live(&start, &end);
        Ok(live.max(partition.high_water(object_key)))
    }

    fn log(&self, operation: Operation) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.lock().append(operation)?;
        }
        Ok(())
    }

    /// Apply a recovered WAL operation without logging it again
    fn replay(&mut self, operation: Operation) -> Result<()> {
        match operation {
            Operation::Put { record } => {
                let key = codec::encode_primary(&record.object_key, record.version_node)?;
                self.partition(&record.object_key).write().insert(key, record);
            }
            Operation::Delete {
                object_key,
                version_node,
            } => {
                let key = codec::encode_primary(&object_key, version_node)?;
                self.partition(&object_key).write().remove(&key);
            }
            Operation::Reserve {
                object_key,
                version_node,
            } => {
                self.partition(&object_key)
                    .write()
                    .raise_high_water(&object_key, version_node);
            }
        }
        Ok(())
    }
}
