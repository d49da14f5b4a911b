//! # VersionKV
//!
//! A versioned key-value store with:
//! - Strictly increasing, never-reused version numbers per object
//! - Optimistic, lock-free version assignment with a bounded retry
//! - A keys-only secondary index by ingest job, maintained asynchronously
//! - Provisioned read/write capacity per table and per index
//! - Optional write-ahead logging with crash recovery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │        ingest / get / list_versions / query_by_job           │
//! └───────┬──────────────────────┬───────────────────────┬──────┘
//!         │ admit                │ put / get / scan      │ scan
//!         ▼                      ▼                       ▼
//!  ┌─────────────┐       ┌──────────────┐        ┌──────────────┐
//!  │  Admission  │       │ PrimaryStore │        │SecondaryIndex│
//!  │ (4 buckets) │       │ (partitions) │        │  (job keys)  │
//!  └──────▲──────┘       └──────┬───────┘        └──────▲───────┘
//!         │ refill              │ append                │ apply
//!  ┌──────┴──────┐       ┌──────▼───────┐        ┌──────┴───────┐
//!  │ Replenisher │       │     WAL      │        │ Maintenance  │
//!  │  (thread)   │       │  (optional)  │        │   workers    │
//!  └─────────────┘       └──────────────┘        └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod schema;

pub mod codec;
pub mod wal;
pub mod store;
pub mod index;
pub mod admission;
pub mod scan;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{VkvError, Result};
pub use config::Config;
pub use engine::{Engine, EngineStats};
pub use store::{ObjectVersion, PrimaryRef};
pub use index::{DeadLetter, IndexEntry};
pub use admission::OperationKind;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of VersionKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
