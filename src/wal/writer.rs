//! WAL Writer
//!
//! Handles appending entries to the WAL file.
//!
//! An append either lands as a whole frame or leaves the file exactly as it
//! was: a write, flush or sync failure truncates the file back to the end of
//! the last good frame and discards the buffered bytes. If that rollback also
//! fails the writer is poisoned and refuses further appends until the log is
//! rewritten.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, VkvError};

use super::{Operation, WalEntry, WalRecovery};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    /// `None` once poisoned by a failed rollback
    writer: Option<BufWriter<File>>,
    /// End of the last fully appended frame
    len: u64,
    /// LSN assigned to the next append
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    uncommitted: usize,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing file is scanned so LSNs continue after its last valid
    /// entry. Run recovery first if the tail may be damaged.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let next_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn + 1
        } else {
            1
        };

        let file = Self::open_append(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            len,
            next_lsn,
            sync_strategy,
            uncommitted: 0,
        })
    }

    /// Append an operation, returning its LSN
    ///
    /// On error nothing of the frame survives and the LSN is not consumed.
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operation).serialize()?;
        let uncommitted = self.uncommitted;

        if let Err(err) = self.write_frame(&bytes) {
            self.roll_back(lsn, uncommitted);
            return Err(err);
        }

        self.len += bytes.len() as u64;
        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Replace the log with exactly `operations`
    ///
    /// Written to a sibling file, synced, then renamed over the log so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&mut self, operations: impl IntoIterator<Item = Operation>) -> Result<u64> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut written = 0u64;
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut tmp = BufWriter::new(file);

            for operation in operations {
                let bytes = WalEntry::new(self.next_lsn, operation).serialize()?;
                tmp.write_all(&bytes)?;
                self.next_lsn += 1;
                written += 1;
            }

            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = Self::open_append(&self.path)?;
        self.len = file.metadata()?.len();
        self.writer = Some(BufWriter::new(file));
        self.uncommitted = 0;

        Ok(written)
    }

    /// LSN that the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Entries appended since the last sync
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a failed rollback has disabled appends
    pub fn is_poisoned(&self) -> bool {
        self.writer.is_none()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            VkvError::Storage("WAL writer poisoned by an earlier failed append".to_string())
        })
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        self.uncommitted += 1;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => self.sync(),
            WalSyncStrategy::EveryNEntries { count } if self.uncommitted >= count => self.sync(),
            WalSyncStrategy::EveryNEntries { .. } => Ok(self.writer()?.flush()?),
        }
    }

    /// Drop every byte of a failed append, buffered or already written
    fn roll_back(&mut self, lsn: u64, uncommitted: usize) {
        let failed = match self.writer.take() {
            Some(writer) => writer,
            None => return,
        };
        // Taking the parts apart skips the flush `BufWriter` does on drop
        let (file, _discarded) = failed.into_parts();

        match file.set_len(self.len).and_then(|()| file.sync_data()) {
            Ok(()) => {
                tracing::warn!("Rolled back failed WAL append at lsn {}", lsn);
                self.writer = Some(BufWriter::new(file));
                self.uncommitted = uncommitted;
            }
            Err(err) => {
                tracing::error!(
                    "WAL rollback at lsn {} failed, refusing further appends: {}",
                    lsn,
                    err
                );
            }
        }
    }
}
