//! Secondary index storage
//!
//! Ordered map of encoded index keys to primary back-references, plus the
//! job keys claimed by writes whose upsert has not been applied yet.
//!
//! ## Claim Lifecycle
//! ```text
//!  try_claim ──► Reserved ──put ok──► Committed ──upsert applied──► (entries)
//!                   │
//!                   └──put failed──► released
//! ```
//! A job key has at most one claimant at a time. `try_claim` checks the
//! committed entries and the pending claims under the `pending` lock, so two
//! writers can never both reserve the same job key.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::{Mutex, RwLock};

use crate::codec;
use crate::error::{Result, VkvError};
use crate::store::{Page, PrimaryRef};

use super::{IndexEntry, JobCursor, MaintenanceTask};

/// Keys-only secondary index over job keys
#[derive(Default)]
pub struct SecondaryIndex {
    /// Encoded index key → owning record
    entries: RwLock<BTreeMap<Vec<u8>, PrimaryRef>>,

    /// Job keys claimed by writes whose upsert has not been applied yet
    ///
    /// Lock order: `pending` before `entries`.
    pending: Mutex<HashMap<Vec<u8>, PendingClaim>>,
}

/// A job key held outside `entries`
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingClaim {
    /// The owning put has not returned yet
    Reserved(PrimaryRef),
    /// The owning put committed; its upsert is queued
    Committed(PrimaryRef),
}

impl PendingClaim {
    fn owner(&self) -> &PrimaryRef {
        match self {
            PendingClaim::Reserved(owner) | PendingClaim::Committed(owner) => owner,
        }
    }
}

/// Result of trying to claim a job key
#[derive(Debug)]
pub enum ClaimOutcome<'a> {
    /// The caller now holds the job key
    Claimed(JobClaim<'a>),
    /// A live record already owns the job key
    Owned(PrimaryRef),
    /// Another write holds the job key and has not committed yet
    InFlight(PrimaryRef),
}

/// An exclusive reservation of one job key
///
/// Dropping the claim without calling [`JobClaim::commit`] releases it.
#[derive(Debug)]
pub struct JobClaim<'a> {
    index: &'a SecondaryIndex,
    key: Vec<u8>,
    target: PrimaryRef,
    committed: bool,
}

impl JobClaim<'_> {
    pub fn target(&self) -> &PrimaryRef {
        &self.target
    }

    /// Mark the owning put as committed; the claim stays until its upsert runs
    pub fn commit(mut self) {
        self.index
            .pending
            .lock()
            .insert(self.key.clone(), PendingClaim::Committed(self.target.clone()));
        self.committed = true;
    }
}

impl Drop for JobClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.index.release(&self.key, &self.target);
        }
    }
}

impl std::fmt::Debug for SecondaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("entries", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a job key to its record
    ///
    /// Re-applying an identical entry is a no-op. A job key that already
    /// maps to a different record fails with `DuplicateJobKey`; the existing
    /// mapping is left untouched.
    pub fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        let key = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range)?;
        Self::upsert_locked(&mut self.entries.write(), key, entry)
    }

    /// Drop a job key. Removing a missing key succeeds.
    pub fn remove(&self, job_hash: &str, job_range: &str) -> Result<()> {
        let key = codec::encode_index(job_hash, job_range)?;
        self.entries.write().remove(&key);
        Ok(())
    }

    /// Drop a job key only if it still points at `owner`
    pub fn remove_owned(&self, entry: &IndexEntry) -> Result<bool> {
        let key = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range)?;
        Ok(Self::remove_owned_locked(&mut self.entries.write(), &key, &entry.target))
    }

    /// Committed mapping for a job key
    pub fn lookup(&self, job_hash: &str, job_range: &str) -> Result<Option<PrimaryRef>> {
        let key = codec::encode_index(job_hash, job_range)?;
        Ok(self.entries.read().get(&key).cloned())
    }

    /// Committed or in-flight owner of a job key
    pub fn claimant(&self, job_hash: &str, job_range: &str) -> Result<Option<PrimaryRef>> {
        let key = codec::encode_index(job_hash, job_range)?;
        if let Some(owner) = self.entries.read().get(&key) {
            return Ok(Some(owner.clone()));
        }
        Ok(self.pending.lock().get(&key).map(|claim| claim.owner().clone()))
    }

    /// Read one page of a job's entries, ascending by range token
    pub fn scan_job(&self, cursor: &JobCursor, limit: usize) -> Result<Page<IndexEntry, JobCursor>> {
        let limit = limit.max(1);
        let lower = match &cursor.lower {
            Bound::Included(range) => Bound::Included(codec::encode_index(&cursor.job_hash, range)?),
            Bound::Excluded(range) => Bound::Excluded(codec::encode_index(&cursor.job_hash, range)?),
            Bound::Unbounded => Bound::Included(codec::index_prefix(&cursor.job_hash)?),
        };
        let upper = codec::encode_index(&cursor.job_hash, &cursor.to_range)?;

        let empty = match &lower {
            Bound::Included(start) => start > &upper,
            Bound::Excluded(start) => start >= &upper,
            Bound::Unbounded => false,
        };
        if empty {
            return Ok(Page {
                items: Vec::new(),
                next: None,
            });
        }

        let entries = self.entries.read();
        let mut items = Vec::with_capacity(limit);
        for (key, target) in entries.range((lower, Bound::Included(upper))).take(limit) {
            let (job_hash, job_range) = codec::decode_index(key)?;
            items.push(IndexEntry::new(job_hash, job_range, target.clone()));
        }
        drop(entries);

        let next = match items.last() {
            Some(last) if items.len() >= limit && last.ingest_job_range != cursor.to_range => {
                Some(JobCursor {
                    job_hash: cursor.job_hash.clone(),
                    lower: Bound::Excluded(last.ingest_job_range.clone()),
                    to_range: cursor.to_range.clone(),
                })
            }
            _ => None,
        };

        Ok(Page { items, next })
    }

    /// Apply a batch of maintenance tasks under one write lock
    ///
    /// `is_live` reports whether an upsert's record still exists; stale
    /// upserts are skipped so an entry never outlives its record. An entry
    /// whose own record is gone is replaced by a live claimant.
    pub fn apply_batch(
        &self,
        tasks: &[MaintenanceTask],
        is_live: impl Fn(&PrimaryRef) -> bool,
    ) -> Vec<Result<()>> {
        let mut entries = self.entries.write();

        tasks
            .iter()
            .map(|task| {
                let entry = task.entry();
                let key = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range)?;
                match task {
                    MaintenanceTask::Upsert(entry) => {
                        if !is_live(&entry.target) {
                            tracing::debug!("Skipping stale {}", task);
                            return Ok(());
                        }
                        if let Some(existing) = entries.get(&key) {
                            if existing != &entry.target && !is_live(existing) {
                                entries.remove(&key);
                            }
                        }
                        Self::upsert_locked(&mut entries, key, entry)
                    }
                    MaintenanceTask::Remove(entry) => {
                        Self::remove_owned_locked(&mut entries, &key, &entry.target);
                        Ok(())
                    }
                }
            })
            .collect()
    }

    // =========================================================================
    // In-flight Claims
    // =========================================================================

    /// Atomically claim `entry`'s job key for `entry.target`
    ///
    /// The key is free when neither the committed entries nor a pending
    /// claim name a live owner. A reservation whose record is not stored yet
    /// is reported as `InFlight` rather than stolen.
    pub fn try_claim(
        &self,
        entry: &IndexEntry,
        is_live: impl Fn(&PrimaryRef) -> bool,
    ) -> Result<ClaimOutcome<'_>> {
        let key = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range)?;
        let mut pending = self.pending.lock();

        if let Some(owner) = self.entries.read().get(&key) {
            if is_live(owner) {
                return Ok(ClaimOutcome::Owned(owner.clone()));
            }
        }

        match pending.get(&key) {
            Some(claim) if is_live(claim.owner()) => {
                return Ok(ClaimOutcome::Owned(claim.owner().clone()));
            }
            Some(PendingClaim::Reserved(owner)) => {
                return Ok(ClaimOutcome::InFlight(owner.clone()));
            }
            // Committed but deleted before its upsert ran
            Some(PendingClaim::Committed(_)) | None => {}
        }

        pending.insert(key.clone(), PendingClaim::Reserved(entry.target.clone()));
        Ok(ClaimOutcome::Claimed(JobClaim {
            index: self,
            key,
            target: entry.target.clone(),
            committed: false,
        }))
    }

    /// Record that `entry`'s upsert has been enqueued
    ///
    /// Used by writes that skip `try_claim`. A committed record outranks an
    /// outstanding reservation, which can no longer be released over it.
    pub fn mark_pending(&self, entry: &IndexEntry) -> Result<()> {
        let key = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range)?;
        self.pending
            .lock()
            .insert(key, PendingClaim::Committed(entry.target.clone()));
        Ok(())
    }

    /// Forget a committed claim once its upsert has been handled
    pub fn clear_pending(&self, entry: &IndexEntry) {
        if let Ok(key) = codec::encode_index(&entry.ingest_job_hash, &entry.ingest_job_range) {
            let mut pending = self.pending.lock();
            if pending.get(&key) == Some(&PendingClaim::Committed(entry.target.clone())) {
                pending.remove(&key);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn release(&self, key: &[u8], target: &PrimaryRef) {
        let mut pending = self.pending.lock();
        if pending.get(key) == Some(&PendingClaim::Reserved(target.clone())) {
            pending.remove(key);
        }
    }

    fn upsert_locked(
        entries: &mut BTreeMap<Vec<u8>, PrimaryRef>,
        key: Vec<u8>,
        entry: &IndexEntry,
    ) -> Result<()> {
        match entries.get(&key) {
            Some(existing) if existing == &entry.target => Ok(()),
            Some(existing) => Err(VkvError::DuplicateJobKey {
                job_hash: entry.ingest_job_hash.clone(),
                job_range: entry.ingest_job_range.clone(),
                existing: existing.clone(),
            }),
            None => {
                entries.insert(key, entry.target.clone());
                Ok(())
            }
        }
    }

    fn remove_owned_locked(
        entries: &mut BTreeMap<Vec<u8>, PrimaryRef>,
        key: &[u8],
        owner: &PrimaryRef,
    ) -> bool {
        if entries.get(key) == Some(owner) {
            entries.remove(key);
            true
        } else {
            false
        }
    }
}
