//! Error types for VersionKV
//!
//! Every failure a caller can observe falls into one of the categories below.
//! Only `Throttled` carries actionable retry guidance.

use std::time::Duration;

use thiserror::Error;

use crate::admission::OperationKind;
use crate::index::MaintenanceTask;
use crate::store::PrimaryRef;

/// Result type alias using VkvError
pub type Result<T> = std::result::Result<T, VkvError>;

/// Unified error type for VersionKV operations
#[derive(Debug, Clone, Error)]
pub enum VkvError {
    // -------------------------------------------------------------------------
    // Key Errors
    // -------------------------------------------------------------------------
    /// Malformed key input. Local and synchronous, never retried.
    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Write Errors
    // -------------------------------------------------------------------------
    /// Lost an optimistic race on `(object_key, version_node)`.
    #[error("Version conflict on {object_key}@{version_node}")]
    Conflict {
        object_key: String,
        version_node: u64,
    },

    /// `(job_hash, job_range)` already belongs to a different record.
    #[error("Job key ({job_hash}, {job_range}) already maps to {existing}")]
    DuplicateJobKey {
        job_hash: String,
        job_range: String,
        existing: PrimaryRef,
    },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Throttled on {kind}: retry after {retry_after:?}")]
    Throttled {
        kind: OperationKind,
        retry_after: Duration,
    },

    // -------------------------------------------------------------------------
    // Index Maintenance Errors
    // -------------------------------------------------------------------------
    /// A maintenance task that can never succeed. Delivered on the
    /// dead-letter channel, never returned from the write that caused it.
    #[error("Index maintenance failed for {task}: {reason}")]
    MaintenanceFailure {
        task: MaintenanceTask,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Substrate Errors
    // -------------------------------------------------------------------------
    /// I/O failure or log corruption in the local durability layer.
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VkvError {
    /// Suggested backoff, present only on `Throttled`
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VkvError::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether a caller-driven retry can succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, VkvError::Throttled { .. })
    }
}

impl From<std::io::Error> for VkvError {
    fn from(err: std::io::Error) -> Self {
        VkvError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for VkvError {
    fn from(err: bincode::Error) -> Self {
        VkvError::Storage(format!("serialization: {}", err))
    }
}
