//! Configuration for VersionKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VkvError};
use crate::schema::{TableSchema, Throughput};

/// Main configuration for a VersionKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the write-ahead log. `None` keeps everything in
    /// memory.
    /// Internal structure:
    ///   {data_dir}/
    ///     └── versions.wal
    pub data_dir: Option<PathBuf>,

    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Number of hash partitions in the primary store
    pub partitions: usize,

    // -------------------------------------------------------------------------
    // Schema / Capacity Configuration
    // -------------------------------------------------------------------------
    /// Table + index definition, including provisioned throughput
    pub schema: TableSchema,

    /// Token replenishment tick (milliseconds)
    pub refill_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Index Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Worker threads applying index maintenance
    pub maintenance_workers: usize,

    /// Max tasks a worker drains into one batch
    pub maintenance_batch_size: usize,

    /// First retry delay after a transient failure (milliseconds)
    pub maintenance_backoff_base_ms: u64,

    /// Retry delay cap (milliseconds)
    pub maintenance_backoff_max_ms: u64,

    /// Dead letters kept for operators; the oldest is dropped when full
    pub dead_letter_capacity: usize,

    // -------------------------------------------------------------------------
    // Read Configuration
    // -------------------------------------------------------------------------
    /// Records fetched per page by `list_versions` / `query_by_job` scans
    pub scan_page_size: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            partitions: 16,
            schema: TableSchema::default(),
            refill_interval_ms: 100,
            maintenance_workers: 4,
            maintenance_batch_size: 32,
            maintenance_backoff_base_ms: 10,
            maintenance_backoff_max_ms: 1000,
            dead_letter_capacity: 1024,
            scan_page_size: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration before an engine is opened with it
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(VkvError::InvalidConfig(msg.to_string()));

        if self.partitions == 0 {
            return invalid("partitions must be at least 1");
        }
        if self.maintenance_workers == 0 {
            return invalid("maintenance_workers must be at least 1");
        }
        if self.maintenance_batch_size == 0 {
            return invalid("maintenance_batch_size must be at least 1");
        }
        if self.refill_interval_ms == 0 {
            return invalid("refill_interval_ms must be positive");
        }
        if self.dead_letter_capacity == 0 {
            return invalid("dead_letter_capacity must be at least 1");
        }
        if self.scan_page_size == 0 {
            return invalid("scan_page_size must be at least 1");
        }
        if self.maintenance_backoff_base_ms > self.maintenance_backoff_max_ms {
            return invalid("maintenance backoff base exceeds its cap");
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return invalid("wal sync count must be at least 1");
        }

        for (name, t) in [
            ("table", self.schema.throughput),
            ("index", self.schema.job_index.throughput),
        ] {
            if t.read_units == 0 || t.write_units == 0 {
                return Err(VkvError::InvalidConfig(format!(
                    "{} capacity must be positive, got {:?}",
                    name, t
                )));
            }
        }

        Ok(())
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (enables the write-ahead log)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(path.into());
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the number of primary store partitions
    pub fn partitions(mut self, count: usize) -> Self {
        self.config.partitions = count;
        self
    }

    /// Replace the whole schema
    pub fn schema(mut self, schema: TableSchema) -> Self {
        self.config.schema = schema;
        self
    }

    /// Set the table's provisioned capacity
    pub fn table_throughput(mut self, read_units: u64, write_units: u64) -> Self {
        self.config.schema.throughput = Throughput {
            read_units,
            write_units,
        };
        self
    }

    /// Set the secondary index's provisioned capacity
    pub fn index_throughput(mut self, read_units: u64, write_units: u64) -> Self {
        self.config.schema.job_index.throughput = Throughput {
            read_units,
            write_units,
        };
        self
    }

    /// Set the token replenishment tick (in milliseconds)
    pub fn refill_interval_ms(mut self, ms: u64) -> Self {
        self.config.refill_interval_ms = ms;
        self
    }

    /// Set the number of index maintenance workers
    pub fn maintenance_workers(mut self, count: usize) -> Self {
        self.config.maintenance_workers = count;
        self
    }

    /// Set the maintenance batch size
    pub fn maintenance_batch_size(mut self, size: usize) -> Self {
        self.config.maintenance_batch_size = size;
        self
    }

    /// Set the maintenance retry backoff (base and cap, in milliseconds)
    pub fn maintenance_backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.config.maintenance_backoff_base_ms = base;
        self.config.maintenance_backoff_max_ms = max;
        self
    }

    /// Set how many dead letters are kept before the oldest is dropped
    pub fn dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.config.dead_letter_capacity = capacity;
        self
    }

    /// Set the scan page size
    pub fn scan_page_size(mut self, size: usize) -> Self {
        self.config.scan_page_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
