//! Engine Module
//!
//! The versioning engine: the public surface that ties the store, the index
//! and admission control together.
//!
//! ## Responsibilities
//! - Assign strictly increasing version numbers per object-key
//! - Run `ingest` as one logical operation (admission → version assignment
//!   → conditional put → index maintenance)
//! - Charge every read and write against the provisioned budgets
//! - Rebuild the secondary index from the store on startup
//! - Own the lifecycle of the replenisher thread and maintenance workers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::Receiver;

use crate::admission::{AdmissionController, BucketStats, OperationKind, Replenisher};
use crate::codec;
use crate::config::Config;
use crate::error::{Result, VkvError};
use crate::index::{
    ClaimOutcome, DeadLetter, IndexEntry, JobCursor, MaintenancePipeline, MaintenanceTask,
    PipelineSettings, SecondaryIndex,
};
use crate::scan::{JobScan, VersionScan};
use crate::store::{ObjectVersion, Page, PrimaryRef, PrimaryStore, VersionCursor};
use crate::wal::RecoveryResult;

/// Point-in-time counters for operators
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Live object-versions
    pub records: usize,
    /// Committed index entries
    pub index_entries: usize,
    /// Job keys whose upsert is still queued
    pub pending_index_claims: usize,
    /// Maintenance tasks enqueued but not yet applied
    pub maintenance_in_flight: usize,
    /// Dead letters waiting to be received
    pub dead_letters_waiting: usize,
    /// Dead letters discarded because the channel was full
    pub dead_letters_dropped: u64,
    /// One entry per budget
    pub buckets: Vec<BucketStats>,
}

/// The versioned store
///
/// ## Concurrency Model
/// - No engine-wide lock. Writers on different object-keys proceed in
///   parallel; writers on the same key are arbitrated by the store's
///   conditional put
/// - `ingest` retries exactly once after losing a race, then returns
///   `Conflict`
/// - A job key is reserved in the index before its record is written, so at
///   most one ingest can own it
/// - Reads never block writes; admission is the only shared point and
///   contention there shows up as `Throttled`
/// - Index maintenance runs on background workers after the write returns
pub struct Engine {
    config: Config,

    store: Arc<PrimaryStore>,
    index: Arc<SecondaryIndex>,
    admission: Arc<AdmissionController>,

    /// Declared before `replenisher` so workers drain while tokens still flow
    pipeline: MaintenancePipeline,
    replenisher: Replenisher,

    /// WAL replay stats from startup
    recovery: Option<RecoveryResult>,
}

impl Engine {
    /// Version assignment attempts per `ingest` (first try + one retry)
    pub const MAX_INGEST_ATTEMPTS: u32 = 2;

    /// Open an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config
    /// 2. Open the primary store (replaying the WAL if present)
    /// 3. Create admission buckets and start the replenisher
    /// 4. Start the maintenance workers
    /// 5. Rebuild the secondary index from the store
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (store, recovery) = PrimaryStore::open(&config)?;
        if let Some(result) = &recovery {
            tracing::info!(
                "WAL recovery: {} entries recovered, {} corrupted, last_lsn={}, truncated={}",
                result.entries_recovered,
                result.entries_corrupted,
                result.last_lsn,
                result.was_truncated
            );
        }
        let store = Arc::new(store);

        let admission = Arc::new(AdmissionController::new(
            &config.schema,
            config.refill_interval(),
        ));
        let replenisher = Replenisher::spawn(Arc::clone(&admission))?;

        let index = Arc::new(SecondaryIndex::new());
        let pipeline = MaintenancePipeline::start(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&admission),
            PipelineSettings::from_config(&config),
        )?;

        let engine = Self {
            config,
            store,
            index,
            admission,
            pipeline,
            replenisher,
            recovery,
        };
        engine.rebuild_index();

        tracing::info!(
            "Engine opened: {} records, {} index entries, durable={}",
            engine.store.len(),
            engine.index.len(),
            engine.store.is_durable()
        );

        Ok(engine)
    }

    /// Open with a data directory (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Versioning
    // =========================================================================

    /// The version the next write to `object_key` would receive
    ///
    /// `0` for an object with no history, otherwise one past the highest
    /// version ever committed (including deleted ones).
    pub fn next_version(&self, object_key: &str) -> Result<u64> {
        Ok(self.candidate_version(object_key)?.1)
    }

    /// Store a new version of `object_key` produced by a job
    ///
    /// Steps:
    /// 1. Validate keys
    /// 2. Assign `next_version` and claim the job key for that version. A
    ///    job key owned by a live version of the same object returns that
    ///    version; owned by another object fails with `DuplicateJobKey`
    /// 3. Admit one table write unit (first attempt only)
    /// 4. Conditionally put; on `Conflict` release the claim and go back to
    ///    step 2 once
    /// 5. Commit the claim and enqueue index maintenance
    ///
    /// A job key reserved by a same-object ingest that has not returned yet
    /// fails with `Conflict`; retrying afterwards returns its record.
    pub fn ingest(
        &self,
        object_key: &str,
        job_hash: &str,
        job_range: &str,
        payload: impl Into<Bytes>,
    ) -> Result<ObjectVersion> {
        self.ingest_with(object_key, job_hash, job_range, payload.into(), |_| {})
    }

    // =========================================================================
    // Primary Operations
    // =========================================================================

    /// Conditionally insert a record with a caller-chosen version
    ///
    /// See [`PrimaryStore::put`]. Index maintenance is enqueued on success;
    /// a job-key collision surfaces on the dead-letter channel.
    pub fn put(&self, record: ObjectVersion, expected_prior: Option<u64>) -> Result<()> {
        let _permit = self.admission.admit(OperationKind::TableWrite, 1)?;
        self.store.put(record.clone(), expected_prior)?;
        self.after_put(&record)
    }

    /// Point read, one table read unit
    pub fn get(&self, object_key: &str, version_node: u64) -> Result<Option<ObjectVersion>> {
        let _permit = self.admission.admit(OperationKind::TableRead, 1)?;
        self.store.get(object_key, version_node)
    }

    /// Lazy ascending scan of versions `from..=to` of `object_key`
    ///
    /// Each page costs one table read unit per record.
    pub fn list_versions(&self, object_key: &str, from: u64, to: u64) -> Result<VersionScan<'_>> {
        codec::primary_prefix(object_key)?;
        Ok(VersionScan::new(self, VersionCursor::new(object_key, from, to)))
    }

    /// Continue a version scan from a saved cursor
    pub fn resume_versions(&self, cursor: VersionCursor) -> VersionScan<'_> {
        VersionScan::new(self, cursor)
    }

    /// Remove a record and cascade to its index entry
    ///
    /// Returns the removed record; deleting a missing record is a no-op
    /// that still costs one write unit.
    pub fn delete(&self, object_key: &str, version_node: u64) -> Result<Option<ObjectVersion>> {
        let _permit = self.admission.admit(OperationKind::TableWrite, 1)?;
        let removed = self.store.delete(object_key, version_node)?;

        if let Some(record) = &removed {
            self.pipeline
                .enqueue(MaintenanceTask::Remove(IndexEntry::for_record(record)));
            tracing::trace!("Deleted {}", record.primary_ref());
        }

        Ok(removed)
    }

    // =========================================================================
    // Index Operations
    // =========================================================================

    /// Lazy scan of the primary keys a job produced, ascending by range token
    ///
    /// Each page costs one index read unit per entry.
    pub fn query_by_job(&self, job_hash: &str, from_range: &str, to_range: &str) -> Result<JobScan<'_>> {
        codec::encode_index(job_hash, from_range)?;
        codec::encode_index(job_hash, to_range)?;
        Ok(JobScan::new(self, JobCursor::new(job_hash, from_range, to_range)))
    }

    /// Continue a job query from a saved cursor
    pub fn resume_job_query(&self, cursor: JobCursor) -> JobScan<'_> {
        JobScan::new(self, cursor)
    }

    // =========================================================================
    // Operator Surface
    // =========================================================================

    /// Permanently failed maintenance tasks
    ///
    /// Bounded by `dead_letter_capacity`; undrained letters are dropped
    /// oldest first and counted in [`EngineStats::dead_letters_dropped`].
    pub fn dead_letters(&self) -> &Receiver<DeadLetter> {
        self.pipeline.dead_letters()
    }

    /// Wait until queued index maintenance has been applied
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_for_maintenance(&self, timeout: Duration) -> bool {
        self.pipeline.wait_idle(timeout)
    }

    /// Compact the WAL down to live state
    pub fn checkpoint(&self) -> Result<u64> {
        self.store.checkpoint()
    }

    /// Adjust one provisioned budget at runtime
    pub fn set_capacity(&self, kind: OperationKind, units: u64) -> Result<()> {
        self.admission.set_capacity(kind, units)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            records: self.store.len(),
            index_entries: self.index.len(),
            pending_index_claims: self.index.pending_count(),
            maintenance_in_flight: self.pipeline.in_flight(),
            dead_letters_waiting: self.pipeline.dead_letters().len(),
            dead_letters_dropped: self.pipeline.dead_letters_dropped(),
            buckets: OperationKind::ALL
                .iter()
                .map(|kind| self.admission.stats(*kind))
                .collect(),
        }
    }

    /// Close the engine gracefully
    ///
    /// Drains index maintenance, stops background threads, syncs the WAL.
    pub fn close(mut self) -> Result<()> {
        self.pipeline.shutdown();
        self.replenisher.stop();
        self.store.sync()?;
        tracing::info!("Engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<PrimaryStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<SecondaryIndex> {
        &self.index
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// WAL replay stats, if a WAL was replayed at startup
    pub fn recovery(&self) -> Option<&RecoveryResult> {
        self.recovery.as_ref()
    }

    // =========================================================================
    // Crate-internal (used by scans)
    // =========================================================================

    pub(crate) fn fetch_version_page(
        &self,
        cursor: &VersionCursor,
    ) -> Result<Page<ObjectVersion, VersionCursor>> {
        let limit = self.page_limit(OperationKind::TableRead);
        let page = self.store.scan_versions(cursor, limit)?;
        self.charge_page(OperationKind::TableRead, page.items.len())?;
        Ok(page)
    }

    pub(crate) fn fetch_job_page(&self, cursor: &JobCursor) -> Result<Page<IndexEntry, JobCursor>> {
        let limit = self.page_limit(OperationKind::IndexRead);
        let page = self.index.scan_job(cursor, limit)?;
        self.charge_page(OperationKind::IndexRead, page.items.len())?;
        Ok(page)
    }

    pub(crate) fn is_live(&self, primary: &PrimaryRef) -> bool {
        self.store.contains(primary)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// (latest committed version, version to try next)
    fn candidate_version(&self, object_key: &str) -> Result<(Option<u64>, u64)> {
        let latest = self.store.latest_version(object_key)?;
        let next = match latest {
            Some(v) => codec::checked_next_version(v)?,
            None => 0,
        };
        Ok((latest, next))
    }

    /// `ingest` with a callback run after the job key is claimed and
    /// before each put attempt
    fn ingest_with(
        &self,
        object_key: &str,
        job_hash: &str,
        job_range: &str,
        payload: Bytes,
        mut before_put: impl FnMut(&ObjectVersion),
    ) -> Result<ObjectVersion> {
        codec::primary_prefix(object_key)?;
        codec::encode_index(job_hash, job_range)?;

        let mut admitted = false;
        let mut attempt = 1;
        loop {
            let (latest, version_node) = self.candidate_version(object_key)?;
            let record = ObjectVersion {
                object_key: object_key.to_string(),
                version_node,
                ingest_job_hash: job_hash.to_string(),
                ingest_job_range: job_range.to_string(),
                payload: payload.clone(),
            };
            let entry = IndexEntry::for_record(&record);

            let claim = match self.index.try_claim(&entry, |owner| self.is_live(owner))? {
                ClaimOutcome::Claimed(claim) => claim,
                ClaimOutcome::Owned(owner) => match self.resolve_owner(&entry, owner)? {
                    Some(existing) => {
                        tracing::debug!(
                            "Re-ingestion of ({}, {}) returns {}",
                            job_hash,
                            job_range,
                            existing.primary_ref()
                        );
                        return Ok(existing);
                    }
                    // Owner deleted since the claim check
                    None => continue,
                },
                ClaimOutcome::InFlight(owner) => return Err(Self::in_flight(&entry, owner)),
            };

            // Dropping `claim` on any early return releases the job key
            if !admitted {
                self.admission.admit(OperationKind::TableWrite, 1)?;
                admitted = true;
            }

            before_put(&record);
            match self.store.put(record.clone(), latest) {
                Ok(()) => {
                    claim.commit();
                    self.pipeline.enqueue(MaintenanceTask::Upsert(entry));
                    tracing::trace!("Ingested {}", record.primary_ref());
                    return Ok(record);
                }
                Err(VkvError::Conflict { .. }) if attempt < Self::MAX_INGEST_ATTEMPTS => {
                    tracing::debug!("Lost race on {}@{}, retrying", object_key, version_node);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Existing record for an idempotent re-ingestion, or a duplicate error
    ///
    /// `None` when the owner was deleted after the claim check.
    fn resolve_owner(&self, entry: &IndexEntry, owner: PrimaryRef) -> Result<Option<ObjectVersion>> {
        let existing = match self.store.get(&owner.object_key, owner.version_node)? {
            Some(record) => record,
            None => return Ok(None),
        };

        if owner.object_key != entry.target.object_key {
            return Err(Self::duplicate(entry, owner));
        }
        // A reservation whose version was taken by a different job
        if existing.ingest_job_hash != entry.ingest_job_hash
            || existing.ingest_job_range != entry.ingest_job_range
        {
            return Err(VkvError::Conflict {
                object_key: owner.object_key,
                version_node: owner.version_node,
            });
        }
        Ok(Some(existing))
    }

    fn in_flight(entry: &IndexEntry, owner: PrimaryRef) -> VkvError {
        if owner.object_key == entry.target.object_key {
            VkvError::Conflict {
                object_key: owner.object_key,
                version_node: owner.version_node,
            }
        } else {
            Self::duplicate(entry, owner)
        }
    }

    fn duplicate(entry: &IndexEntry, existing: PrimaryRef) -> VkvError {
        VkvError::DuplicateJobKey {
            job_hash: entry.ingest_job_hash.clone(),
            job_range: entry.ingest_job_range.clone(),
            existing,
        }
    }

    fn after_put(&self, record: &ObjectVersion) -> Result<()> {
        let entry = IndexEntry::for_record(record);
        self.index.mark_pending(&entry)?;
        self.pipeline.enqueue(MaintenanceTask::Upsert(entry));
        Ok(())
    }

    /// Scan pages never exceed what the bucket can hold
    fn page_limit(&self, kind: OperationKind) -> usize {
        let capacity = usize::try_from(self.admission.capacity(kind)).unwrap_or(usize::MAX);
        self.config.scan_page_size.min(capacity).max(1)
    }

    /// One unit per record; an empty page still costs one
    fn charge_page(&self, kind: OperationKind, records: usize) -> Result<()> {
        let units = records.max(1) as u64;
        let _permit = self.admission.admit(kind, units)?;
        Ok(())
    }

    /// Re-derive every index entry from the store
    ///
    /// Runs once at startup, before the engine serves requests. Entries are
    /// applied directly rather than through the budgeted pipeline since they
    /// restore state rather than serve client traffic.
    fn rebuild_index(&self) {
        let mut records = self.store.snapshot();
        records.sort_by(|a, b| {
            (&a.object_key, a.version_node).cmp(&(&b.object_key, b.version_node))
        });

        let tasks: Vec<_> = records
            .iter()
            .map(|record| MaintenanceTask::Upsert(IndexEntry::for_record(record)))
            .collect();
        if tasks.is_empty() {
            return;
        }

        let results = self.index.apply_batch(&tasks, |_| true);
        for (task, result) in tasks.into_iter().zip(results) {
            if let Err(cause) = result {
                self.pipeline.report(DeadLetter { task, cause });
            }
        }

        tracing::info!("Rebuilt secondary index: {} entries", self.index.len());
    }
}
