//! Log readers
//!
//! A reader walks the log forward from a start index. Its cursor is shared
//! with the log so that truncation, reset and compaction can reposition it.

use crate::storage::entry::{Entry, Index, Indexed};
use crate::storage::log::SegmentedLog;
use crate::storage::segment::Segment;
use parking_lot::Mutex;
use std::sync::Arc;

/// Which entries a reader may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Every appended entry
    #[default]
    All,
    /// Only entries at or below the commit index
    Commits,
}

/// Position of a reader, held by the reader and (weakly) by the log
pub struct ReaderCursor {
    segment: Option<Arc<Segment>>,
    next_index: Index,
}

impl ReaderCursor {
    pub(crate) fn new(log: &SegmentedLog, index: Index) -> Self {
        let mut cursor = Self {
            segment: None,
            next_index: index,
        };
        cursor.reset(log, index);
        cursor
    }

    /// Index the reader returns next
    pub fn next_index(&self) -> Index {
        self.next_index
    }

    /// Reposition at `index`, clamped to the first index of the log
    pub(crate) fn reset(&mut self, log: &SegmentedLog, index: Index) {
        let index = index.max(log.first_index());
        self.switch_segment(log.segment(index));
        self.next_index = index;
    }

    fn switch_segment(&mut self, segment: Option<Arc<Segment>>) {
        if let Some(segment) = &segment {
            segment.acquire();
        }
        if let Some(previous) = std::mem::replace(&mut self.segment, segment) {
            previous.release();
        }
    }

    fn read(&mut self, log: &SegmentedLog) -> Option<Indexed<Entry>> {
        let index = self.next_index;
        let cached = self
            .segment
            .as_ref()
            .filter(|s| !s.is_deleted())
            .and_then(|s| s.get(index));

        let entry = match cached {
            Some(entry) => entry,
            None => {
                // Crossed into the next segment, or ours was replaced
                let segment = log.segment(index)?;
                let entry = segment.get(index)?;
                self.switch_segment(Some(segment));
                entry
            }
        };

        self.next_index = index + 1;
        Some(entry)
    }
}

impl Drop for ReaderCursor {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.release();
        }
    }
}

/// Forward iterator over log entries
pub struct LogReader {
    log: Arc<SegmentedLog>,
    cursor: Arc<Mutex<ReaderCursor>>,
    mode: ReadMode,
}

impl LogReader {
    pub(crate) fn new(
        log: Arc<SegmentedLog>,
        cursor: Arc<Mutex<ReaderCursor>>,
        mode: ReadMode,
    ) -> Self {
        Self { log, cursor, mode }
    }

    /// Read mode
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Index of the entry the next call to `next` returns
    pub fn next_index(&self) -> Index {
        self.cursor.lock().next_index()
    }

    /// Whether an entry is available under the reader's mode
    pub fn has_next(&self) -> bool {
        self.next_index() <= self.limit()
    }

    /// Rewind to the first entry of the log
    pub fn reset(&mut self) {
        let first = self.log.first_index();
        self.cursor.lock().reset(&self.log, first);
    }

    /// Move to `index`
    pub fn reset_to(&mut self, index: Index) {
        self.cursor.lock().reset(&self.log, index);
    }

    fn limit(&self) -> Index {
        match self.mode {
            ReadMode::All => self.log.last_index(),
            ReadMode::Commits => self.log.commit_index().min(self.log.last_index()),
        }
    }
}

impl Iterator for LogReader {
    type Item = Indexed<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let limit = self.limit();
        let mut cursor = self.cursor.lock();
        if cursor.next_index() > limit {
            return None;
        }
        cursor.read(&self.log)
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("log", &self.log.name())
            .field("next_index", &self.next_index())
            .field("mode", &self.mode)
            .finish()
    }
}
