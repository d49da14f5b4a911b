//! Secondary Index Module
//!
//! The `ingest-job-index`: a derived, keys-only mapping from
//! `(ingest-job-hash, ingest-job-range)` to the primary key of the record
//! that job produced.
//!
//! ## Consistency Protocol
//! ```text
//!  put/delete ──► PrimaryStore (committed, visible to get)
//!       │
//!       └──► MaintenanceTask ──► shard queue ──► worker ──► SecondaryIndex
//!                                                   │
//!                                                   └──► dead letters
//! ```
//! - `ingest` reserves its job key before the primary write and commits the
//!   claim once the write succeeds, so two writers never share a job key
//! - Tasks are enqueued only after the primary write commits, so a record is
//!   never reachable by job key before it is reachable by primary key
//! - Tasks for one job key always land on the same worker and are applied in
//!   enqueue order; across job keys there is no ordering
//! - Upserts are idempotent, so redelivery after a crash is harmless
//! - Throttling on the index's write budget is retried with exponential
//!   backoff; `DuplicateJobKey` is permanent and goes to the dead-letter
//!   channel

mod maintenance;
mod secondary;

use std::fmt;
use std::ops::Bound;

use crate::store::{ObjectVersion, PrimaryRef};

pub use maintenance::{DeadLetter, MaintenancePipeline, PipelineSettings};
pub use secondary::{ClaimOutcome, JobClaim, SecondaryIndex};

/// Existence of an object-version, reachable by job key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub ingest_job_hash: String,
    pub ingest_job_range: String,
    /// Owning record; lookup only
    pub target: PrimaryRef,
}

impl IndexEntry {
    pub fn new(
        ingest_job_hash: impl Into<String>,
        ingest_job_range: impl Into<String>,
        target: PrimaryRef,
    ) -> Self {
        Self {
            ingest_job_hash: ingest_job_hash.into(),
            ingest_job_range: ingest_job_range.into(),
            target,
        }
    }

    /// The entry a record projects into the index
    pub fn for_record(record: &ObjectVersion) -> Self {
        Self {
            ingest_job_hash: record.ingest_job_hash.clone(),
            ingest_job_range: record.ingest_job_range.clone(),
            target: record.primary_ref(),
        }
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) → {}",
            self.ingest_job_hash, self.ingest_job_range, self.target
        )
    }
}

/// One unit of index maintenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Record committed: make it reachable by job key
    Upsert(IndexEntry),
    /// Record deleted: drop its entry if it still owns the job key
    Remove(IndexEntry),
}

impl MaintenanceTask {
    pub fn entry(&self) -> &IndexEntry {
        match self {
            MaintenanceTask::Upsert(entry) | MaintenanceTask::Remove(entry) => entry,
        }
    }
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceTask::Upsert(entry) => write!(f, "upsert {}", entry),
            MaintenanceTask::Remove(entry) => write!(f, "remove {}", entry),
        }
    }
}

/// Resumption point of a job-key scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCursor {
    pub job_hash: String,
    /// Where the next page starts
    pub lower: Bound<String>,
    /// Last range token in the scan (inclusive)
    pub to_range: String,
}

impl JobCursor {
    pub fn new(
        job_hash: impl Into<String>,
        from_range: impl Into<String>,
        to_range: impl Into<String>,
    ) -> Self {
        Self {
            job_hash: job_hash.into(),
            lower: Bound::Included(from_range.into()),
            to_range: to_range.into(),
        }
    }
}
