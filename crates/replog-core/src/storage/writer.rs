//! The single log writer
//!
//! Appends land in the active segment. When it is full the writer flushes it,
//! creates the next segment and retries once.

use crate::error::{Error, Result};
use crate::storage::entry::{Entry, Index, Indexed};
use crate::storage::format;
use crate::storage::log::SegmentedLog;
use crate::storage::segment::Segment;
use std::sync::Arc;

/// Exclusive appender for a [`SegmentedLog`]
pub struct LogWriter {
    log: Arc<SegmentedLog>,
    current: Arc<Segment>,
    closed: bool,
}

impl LogWriter {
    pub(crate) fn new(log: Arc<SegmentedLog>, current: Arc<Segment>) -> Self {
        current.acquire();
        Self {
            log,
            current,
            closed: false,
        }
    }

    /// The log this writer appends to
    pub fn log(&self) -> &Arc<SegmentedLog> {
        &self.log
    }

    /// Index of the last entry, 0 when nothing was ever written
    pub fn last_index(&self) -> Index {
        self.current.last_index()
    }

    /// Index the next append receives
    pub fn next_index(&self) -> Index {
        self.current.next_index()
    }

    /// Last entry in the log
    pub fn last_entry(&self) -> Option<Indexed<Entry>> {
        self.current.last_entry().or_else(|| {
            // Fresh segment after rotation; the tail lives in the previous one
            let last = self.current.last_index();
            if last == 0 { None } else { self.log.get(last) }
        })
    }

    /// Current commit index of the log
    pub fn commit_index(&self) -> Index {
        self.log.commit_index()
    }

    /// Append an entry at the next index
    pub fn append(&mut self, entry: Entry) -> Result<Indexed<Entry>> {
        self.write(None, entry)
    }

    /// Append an entry whose index was assigned by another member
    ///
    /// Fails with [`Error::InvalidIndex`] unless the index continues the log.
    pub fn append_indexed(&mut self, indexed: Indexed<Entry>) -> Result<Indexed<Entry>> {
        let index = indexed.index();
        self.write(Some(index), indexed.into_entry())
    }

    fn write(&mut self, index: Option<Index>, entry: Entry) -> Result<Indexed<Entry>> {
        self.ensure_open()?;

        match self.write_current(index, entry.clone()) {
            Err(Error::SegmentFull { index: full_at, .. }) => {
                if self.current.is_empty() {
                    return Err(self.too_large(full_at, &entry));
                }
                self.rotate()?;
                match self.write_current(index, entry.clone()) {
                    Err(Error::SegmentFull { index: full_at, .. }) => {
                        Err(self.too_large(full_at, &entry))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    fn write_current(&self, index: Option<Index>, entry: Entry) -> Result<Indexed<Entry>> {
        match index {
            Some(index) => self.current.append_indexed(Indexed::new(index, entry, 0)),
            None => self.current.append(entry),
        }
    }

    fn rotate(&mut self) -> Result<()> {
        self.current.flush()?;
        let next = self.log.next_segment()?;
        next.acquire();
        let full = std::mem::replace(&mut self.current, next);
        full.release();
        Ok(())
    }

    fn too_large(&self, index: Index, entry: &Entry) -> Error {
        match format::record_size(entry) {
            Ok(size) => Error::EntryTooLarge {
                index,
                size,
                max_size: self.current.descriptor().max_size,
            },
            Err(e) => e,
        }
    }

    /// Remove every entry after `index`
    ///
    /// Fails with [`Error::InvalidTruncation`] when `index` is below the
    /// commit index; the log is left unchanged.
    pub fn truncate(&mut self, index: Index) -> Result<()> {
        self.ensure_open()?;

        let commit_index = self.log.commit_index();
        if index < commit_index {
            return Err(Error::InvalidTruncation {
                index,
                commit_index,
            });
        }
        if index >= self.last_index() {
            return Ok(());
        }

        // Drop whole segments past the target, newest first
        while let Some(last) = self.log.last_segment() {
            if last.index() <= index || self.log.segment_count() <= 1 {
                break;
            }
            self.log.remove_segment(&last);
        }

        if let Some(active) = self.log.last_segment() {
            if !Arc::ptr_eq(&active, &self.current) {
                active.acquire();
                let removed = std::mem::replace(&mut self.current, active);
                removed.release();
            }
        }
        self.current.truncate(index)?;
        self.log.reset_tail(index + 1);

        tracing::debug!("Log {} truncated to index {}", self.log.name(), index);
        Ok(())
    }

    /// Restart the log at `index`
    ///
    /// When `index` lies past the first index of the active segment the whole
    /// history is discarded; otherwise the log is truncated to `index - 1`.
    pub fn reset(&mut self, index: Index) -> Result<()> {
        self.ensure_open()?;

        if index > self.current.index() {
            let fresh = self.log.reset_segments(index)?;
            fresh.acquire();
            let old = std::mem::replace(&mut self.current, fresh);
            old.release();
            self.log.set_commit_index(index - 1);
        } else {
            self.truncate(index.saturating_sub(1))?;
        }
        self.log.reset_head(index);
        self.log.reset_tail(index);
        Ok(())
    }

    /// Advance the commit index to `index`, clamped to the last index
    ///
    /// No-op unless the commit index grows. With `flush_on_commit` the active
    /// segment is durable before the new commit index is visible.
    pub fn commit(&mut self, index: Index) -> Result<()> {
        let index = index.min(self.last_index());
        if index <= self.log.commit_index() {
            return Ok(());
        }
        if self.log.is_flush_on_commit() {
            self.current.flush()?;
        }
        self.log.set_commit_index(index);
        tracing::trace!("Log {} committed index {}", self.log.name(), index);
        Ok(())
    }

    /// Flush the active segment to stable storage
    pub fn flush(&mut self) -> Result<()> {
        self.current.flush()
    }

    /// Flush and give up the writer role
    pub fn close(mut self) -> Result<()> {
        let result = self.current.flush();
        self.release();
        result
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.current.release();
            self.log.writer_closed();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed || !self.log.is_open() {
            return Err(Error::closed(format!("writer for log {}", self.log.name())));
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.current.flush() {
                tracing::error!("Failed to flush log {} on drop: {}", self.log.name(), e);
            }
            self.release();
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("log", &self.log.name())
            .field("segment", &self.current.id())
            .field("last_index", &self.last_index())
            .finish()
    }
}
