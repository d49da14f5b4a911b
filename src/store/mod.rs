//! Primary Store Module
//!
//! Holds object-version records keyed by `(object-key, version-node)`.
//!
//! ## Responsibilities
//! - Conditional (optimistic) inserts that never overwrite
//! - Point reads and ordered, restartable per-object version scans
//! - Per-object version high-water marks that survive deletes
//! - Logging every mutation to the WAL when durability is enabled
//!
//! ## Layout
//! Records are spread over hash partitions by object-key. Each partition is a
//! `BTreeMap` keyed by the encoded primary key, so one object's history is a
//! contiguous, version-ordered range inside a single partition.

mod partition;
mod primary;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use primary::PrimaryStore;

/// One immutable snapshot of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub object_key: String,
    pub version_node: u64,
    pub ingest_job_hash: String,
    pub ingest_job_range: String,
    /// Opaque application data
    pub payload: Bytes,
}

impl ObjectVersion {
    /// Primary key of this record
    pub fn primary_ref(&self) -> PrimaryRef {
        PrimaryRef {
            object_key: self.object_key.clone(),
            version_node: self.version_node,
        }
    }
}

/// Primary key of an object-version, used as a non-owning back-reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryRef {
    pub object_key: String,
    pub version_node: u64,
}

impl PrimaryRef {
    pub fn new(object_key: impl Into<String>, version_node: u64) -> Self {
        Self {
            object_key: object_key.into(),
            version_node,
        }
    }
}

impl fmt::Display for PrimaryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object_key, self.version_node)
    }
}

/// Resumption point of a per-object version scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCursor {
    pub object_key: String,
    /// Next version to read (inclusive)
    pub next_version: u64,
    /// Last version in range (inclusive)
    pub to_version: u64,
}

impl VersionCursor {
    pub fn new(object_key: impl Into<String>, from_version: u64, to_version: u64) -> Self {
        Self {
            object_key: object_key.into(),
            next_version: from_version,
            to_version,
        }
    }
}

/// One page of an ordered scan
#[derive(Debug, Clone)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    /// Where to resume, or `None` once the range is exhausted
    pub next: Option<C>,
}
