//! Index maintenance pipeline
//!
//! Sharded worker pool applying `MaintenanceTask`s to the secondary index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};

use crate::admission::{AdmissionController, OperationKind};
use crate::config::Config;
use crate::error::{Result, VkvError};
use crate::store::PrimaryStore;

use super::{MaintenanceTask, SecondaryIndex};

/// A task that can never succeed, handed to operators
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task: MaintenanceTask,
    /// The permanent failure, e.g. `DuplicateJobKey`
    pub cause: VkvError,
}

impl DeadLetter {
    /// The failure as a `MaintenanceFailure` error
    pub fn into_error(self) -> VkvError {
        VkvError::MaintenanceFailure {
            reason: self.cause.to_string(),
            task: self.task,
        }
    }
}

/// Worker pool sizing and retry policy
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub dead_letter_capacity: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.maintenance_workers.max(1),
            batch_size: config.maintenance_batch_size.max(1),
            backoff_base: Duration::from_millis(config.maintenance_backoff_base_ms),
            backoff_max: Duration::from_millis(config.maintenance_backoff_max_ms),
            dead_letter_capacity: config.dead_letter_capacity.max(1),
        }
    }

    /// Exponential backoff: base, 2×base, 4×base, … capped at `backoff_max`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.backoff_max)
    }
}

/// Count of enqueued-but-unfinished tasks, with an idle signal
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn add(&self, n: usize) {
        *self.count.lock() += n;
    }

    fn done(&self, n: usize) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(n);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Bounded queue of dead letters; when full the oldest letter is dropped
struct DeadLetterQueue {
    tx: Sender<DeadLetter>,
    rx: Receiver<DeadLetter>,
    dropped: AtomicU64,
}

impl DeadLetterQueue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, letter: DeadLetter) {
        tracing::error!("Dead-lettering {}: {}", letter.task, letter.cause);

        let mut letter = letter;
        loop {
            match self.tx.try_send(letter) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Dead-letter queue full, dropping {}", oldest.task);
                    }
                    letter = back;
                }
                // Both ends live in this struct
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Everything a worker needs, shared across the pool
struct WorkerContext {
    index: Arc<SecondaryIndex>,
    store: Arc<PrimaryStore>,
    admission: Arc<AdmissionController>,
    dead_letters: Arc<DeadLetterQueue>,
    in_flight: Arc<InFlight>,
    settings: PipelineSettings,
}

/// Queues and workers that keep the secondary index in step with the store
///
/// Tasks are routed to a worker by job key, so every task for one job key
/// is applied in order. Dropping the pipeline (or calling `shutdown`)
/// closes the queues and waits for workers to drain them.
pub struct MaintenancePipeline {
    senders: Vec<Sender<MaintenanceTask>>,
    workers: Vec<JoinHandle<()>>,
    dead_letters: Arc<DeadLetterQueue>,
    in_flight: Arc<InFlight>,
}

impl MaintenancePipeline {
    pub fn start(
        index: Arc<SecondaryIndex>,
        store: Arc<PrimaryStore>,
        admission: Arc<AdmissionController>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let dead_letters = Arc::new(DeadLetterQueue::new(settings.dead_letter_capacity));
        let in_flight = Arc::new(InFlight::default());

        let ctx = Arc::new(WorkerContext {
            index,
            store,
            admission,
            dead_letters: Arc::clone(&dead_letters),
            in_flight: Arc::clone(&in_flight),
            settings,
        });

        let mut senders = Vec::with_capacity(settings.workers);
        let mut workers = Vec::with_capacity(settings.workers);

        for id in 0..settings.workers {
            let (tx, rx) = channel::unbounded::<MaintenanceTask>();
            let ctx = Arc::clone(&ctx);

            let handle = thread::Builder::new()
                .name(format!("vkv-index-{}", id))
                .spawn(move || run_worker(id, rx, ctx))?;

            senders.push(tx);
            workers.push(handle);
        }

        tracing::debug!("Started {} index maintenance workers", settings.workers);

        Ok(Self {
            senders,
            workers,
            dead_letters,
            in_flight,
        })
    }

    /// Queue a task on its job key's worker
    pub fn enqueue(&self, task: MaintenanceTask) {
        if self.senders.is_empty() {
            tracing::warn!("Dropping {} after shutdown", task);
            return;
        }

        let entry = task.entry();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(entry.ingest_job_hash.as_bytes());
        hasher.update(&[0]);
        hasher.update(entry.ingest_job_range.as_bytes());
        let shard = hasher.finalize() as usize % self.senders.len();

        self.in_flight.add(1);
        if let Err(err) = self.senders[shard].send(task) {
            // Worker already gone; only happens during shutdown.
            self.in_flight.done(1);
            tracing::warn!("Dropping {} after worker exit", err.into_inner());
        }
    }

    /// Route a failure found outside the workers to the dead-letter channel
    pub fn report(&self, letter: DeadLetter) {
        self.dead_letters.push(letter);
    }

    /// Operator-facing channel of permanently failed tasks
    ///
    /// Holds at most `dead_letter_capacity` letters; older ones are dropped
    /// to make room.
    pub fn dead_letters(&self) -> &Receiver<DeadLetter> {
        &self.dead_letters.rx
    }

    /// Dead letters discarded because nobody drained the channel
    pub fn dead_letters_dropped(&self) -> u64 {
        self.dead_letters.dropped.load(Ordering::Relaxed)
    }

    /// Tasks enqueued but not yet applied
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Block until every enqueued task has been handled, or `timeout`
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout)
    }

    /// Close the queues and join the workers after they drain
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Index maintenance worker panicked");
            }
        }
    }
}

impl Drop for MaintenancePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Worker
// =============================================================================

fn run_worker(id: usize, rx: Receiver<MaintenanceTask>, ctx: Arc<WorkerContext>) {
    tracing::trace!("Index worker {} running", id);

    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        while batch.len() < ctx.settings.batch_size {
            match rx.try_recv() {
                Ok(task) => batch.push(task),
                Err(_) => break,
            }
        }

        for task in &batch {
            admit_with_backoff(&ctx, task);
        }

        let results = ctx
            .index
            .apply_batch(&batch, |target| ctx.store.contains(target));

        for (task, result) in batch.iter().zip(results) {
            if let MaintenanceTask::Upsert(entry) = task {
                ctx.index.clear_pending(entry);
            }

            if let Err(cause) = result {
                ctx.dead_letters.push(DeadLetter {
                    task: task.clone(),
                    cause,
                });
            }
        }

        ctx.in_flight.done(batch.len());
    }

    tracing::trace!("Index worker {} exiting", id);
}

/// Take one index write unit, retrying with exponential backoff
///
/// Throttling is the only transient failure here, so this retries until the
/// budget admits the task.
fn admit_with_backoff(ctx: &WorkerContext, task: &MaintenanceTask) {
    let mut attempt = 0u32;
    loop {
        match ctx.admission.admit(OperationKind::IndexWrite, 1) {
            Ok(_permit) => return,
            Err(err) => {
                let wait = ctx
                    .settings
                    .backoff(attempt)
                    .max(err.retry_after().unwrap_or_default());
                if attempt > 0 && attempt % 8 == 0 {
                    tracing::warn!("{} throttled {} times, retrying in {:?}", task, attempt, wait);
                }
                thread::sleep(wait);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
