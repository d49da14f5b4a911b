//! Admission controller
//!
//! Owns the four buckets and the thread that replenishes them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::error::{Result, VkvError};
use crate::schema::TableSchema;

use super::bucket::{BucketStats, TokenBucket};
use super::OperationKind;

/// Proof that capacity was granted for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub kind: OperationKind,
    pub units: u64,
}

/// Enforces provisioned read/write capacity for the table and the index
pub struct AdmissionController {
    /// Indexed by `OperationKind::slot`
    buckets: [TokenBucket; 4],

    /// Replenishment tick, used to shape suggested backoffs
    refill_interval: Duration,
}

impl AdmissionController {
    /// Build buckets from the schema's provisioned throughput
    ///
    /// Buckets start full. Nothing refills them until a [`Replenisher`] is
    /// spawned or [`replenish`](Self::replenish) is called.
    pub fn new(schema: &TableSchema, refill_interval: Duration) -> Self {
        let table = schema.throughput;
        let index = schema.job_index.throughput;

        Self {
            buckets: [
                TokenBucket::new(OperationKind::TableRead, table.read_units),
                TokenBucket::new(OperationKind::TableWrite, table.write_units),
                TokenBucket::new(OperationKind::IndexRead, index.read_units),
                TokenBucket::new(OperationKind::IndexWrite, index.write_units),
            ],
            refill_interval,
        }
    }

    /// Request `units` of capacity from the bucket for `kind`
    ///
    /// Never blocks. On insufficient tokens returns `Throttled` with a
    /// suggested backoff; the caller decides whether to retry.
    pub fn admit(&self, kind: OperationKind, units: u64) -> Result<Permit> {
        match self.bucket(kind).try_take(units, self.refill_interval) {
            Ok(()) => Ok(Permit { kind, units }),
            Err(retry_after) => {
                tracing::trace!("Throttled {} units on {}, retry after {:?}", units, kind, retry_after);
                Err(VkvError::Throttled { kind, retry_after })
            }
        }
    }

    /// Add tokens for `elapsed` time to every bucket
    pub fn replenish(&self, elapsed: Duration) {
        for bucket in &self.buckets {
            bucket.refill(elapsed);
        }
    }

    /// Change one bucket's provisioned units per second
    pub fn set_capacity(&self, kind: OperationKind, units: u64) -> Result<()> {
        if units == 0 {
            return Err(VkvError::InvalidConfig(format!(
                "{} capacity must be positive",
                kind
            )));
        }
        self.bucket(kind).set_rate(units);
        tracing::info!("Capacity for {} set to {} units/s", kind, units);
        Ok(())
    }

    /// Provisioned units per second for `kind`
    pub fn capacity(&self, kind: OperationKind) -> u64 {
        self.bucket(kind).rate()
    }

    pub fn stats(&self, kind: OperationKind) -> BucketStats {
        self.bucket(kind).stats()
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    fn bucket(&self, kind: OperationKind) -> &TokenBucket {
        &self.buckets[kind.slot()]
    }
}

/// Background thread refilling an [`AdmissionController`] on a fixed tick
///
/// Stops when dropped.
pub struct Replenisher {
    /// Dropping this wakes and stops the thread
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Replenisher {
    pub fn spawn(controller: Arc<AdmissionController>) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let interval = controller.refill_interval();

        let handle = thread::Builder::new()
            .name("vkv-replenisher".to_string())
            .spawn(move || {
                tracing::debug!("Replenisher started, tick {:?}", interval);
                let mut last = Instant::now();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let now = Instant::now();
                            controller.replenish(now.duration_since(last));
                            last = now;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Replenisher stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Replenisher {
    fn drop(&mut self) {
        self.stop();
    }
}
