//! Lazy, restartable scans
//!
//! Both iterators fetch one page at a time through the engine, which charges
//! read units for every record on the page. A throttled page is yielded as
//! an `Err` and the iterator stays at the same position, so calling `next`
//! again retries it. `cursor()` captures the exact resume point.

use std::collections::VecDeque;
use std::ops::Bound;

use crate::engine::Engine;
use crate::error::Result;
use crate::index::{IndexEntry, JobCursor};
use crate::store::{ObjectVersion, PrimaryRef, VersionCursor};

/// Ascending scan over one object's versions
pub struct VersionScan<'a> {
    engine: &'a Engine,
    /// The scan as first requested
    origin: VersionCursor,
    /// Next page to fetch, `None` once exhausted
    cursor: Option<VersionCursor>,
    /// Fetched but not yet yielded
    buffer: VecDeque<ObjectVersion>,
}

impl<'a> VersionScan<'a> {
    pub(crate) fn new(engine: &'a Engine, cursor: VersionCursor) -> Self {
        Self {
            engine,
            origin: cursor.clone(),
            cursor: Some(cursor),
            buffer: VecDeque::new(),
        }
    }

    /// Where a new scan should start to continue from here
    pub fn cursor(&self) -> Option<VersionCursor> {
        match self.buffer.front() {
            Some(front) => Some(VersionCursor {
                next_version: front.version_node,
                ..self.origin.clone()
            }),
            None => self.cursor.clone(),
        }
    }
}

impl Iterator for VersionScan<'_> {
    type Item = Result<ObjectVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }

            let cursor = self.cursor.as_ref()?;
            match self.engine.fetch_version_page(cursor) {
                Ok(page) => {
                    self.cursor = page.next;
                    self.buffer.extend(page.items);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Ascending scan over one job's index entries
///
/// Yields primary keys only; fetch the record by primary key for its payload.
pub struct JobScan<'a> {
    engine: &'a Engine,
    origin: JobCursor,
    cursor: Option<JobCursor>,
    buffer: VecDeque<IndexEntry>,
}

impl<'a> JobScan<'a> {
    pub(crate) fn new(engine: &'a Engine, cursor: JobCursor) -> Self {
        Self {
            engine,
            origin: cursor.clone(),
            cursor: Some(cursor),
            buffer: VecDeque::new(),
        }
    }

    /// Where a new scan should start to continue from here
    pub fn cursor(&self) -> Option<JobCursor> {
        match self.buffer.front() {
            Some(front) => Some(JobCursor {
                lower: Bound::Included(front.ingest_job_range.clone()),
                ..self.origin.clone()
            }),
            None => self.cursor.clone(),
        }
    }
}

impl Iterator for JobScan<'_> {
    type Item = Result<PrimaryRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(entry) = self.buffer.pop_front() {
                // An entry whose record was deleted may linger until its
                // removal task runs; it is never surfaced.
                if self.engine.is_live(&entry.target) {
                    return Some(Ok(entry.target));
                }
            }

            let cursor = self.cursor.as_ref()?;
            match self.engine.fetch_job_page(cursor) {
                Ok(page) => {
                    self.cursor = page.next;
                    self.buffer.extend(page.items);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
