//! Throughput Admission Module
//!
//! Fixed read/write capacity budgets for the table and its secondary index.
//!
//! ## Model
//! - Four independent token buckets: table read, table write, index read,
//!   index write
//! - Each bucket holds at most one second of its provisioned capacity and
//!   starts full
//! - A background replenisher adds tokens on a fixed tick; admission itself
//!   is a lock-free compare-and-swap on the bucket's counter
//! - Insufficient tokens → `Throttled` with a suggested backoff; nothing is
//!   ever queued inside the controller
//!
//! ## Unit Accounting
//! - One read unit per point read, one per record returned by a scan page
//! - One write unit per put/delete on the table
//! - One write unit per index maintenance task, charged to the index

mod bucket;
mod controller;

use std::fmt;

pub use bucket::BucketStats;
pub use controller::{AdmissionController, Permit, Replenisher};

/// Which budget an operation draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    TableRead,
    TableWrite,
    IndexRead,
    IndexWrite,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::TableRead,
        OperationKind::TableWrite,
        OperationKind::IndexRead,
        OperationKind::IndexWrite,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            OperationKind::TableRead => 0,
            OperationKind::TableWrite => 1,
            OperationKind::IndexRead => 2,
            OperationKind::IndexWrite => 3,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::TableRead => "table-read",
            OperationKind::TableWrite => "table-write",
            OperationKind::IndexRead => "index-read",
            OperationKind::IndexWrite => "index-write",
        };
        f.write_str(name)
    }
}
