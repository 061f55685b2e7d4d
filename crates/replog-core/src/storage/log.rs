//! Segmented log
//!
//! Owns the ordered set of segments keyed by first index and the global
//! commit index. Appends go through the single [`LogWriter`]; reads through
//! any number of [`LogReader`]s.

use crate::error::{Error, Result};
use crate::storage::config::{LogConfig, StorageLevel};
use crate::storage::entry::{Entry, Index, Indexed};
use crate::storage::format::SegmentDescriptor;
use crate::storage::reader::{LogReader, ReadMode, ReaderCursor};
use crate::storage::segment::Segment;
use crate::storage::writer::LogWriter;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Index of the first entry of a fresh log
pub const FIRST_INDEX: Index = 1;

/// An ordered set of segments with a commit index
pub struct SegmentedLog {
    config: LogConfig,
    segments: RwLock<BTreeMap<Index, Arc<Segment>>>,
    next_segment_id: AtomicU64,
    commit_index: AtomicU64,
    writer_open: AtomicBool,
    readers: Mutex<Vec<Weak<Mutex<ReaderCursor>>>>,
    open: AtomicBool,
}

impl SegmentedLog {
    /// Open the log, recovering existing segments for disk storage
    pub fn open(config: LogConfig) -> Result<Arc<Self>> {
        config.validate().map_err(Error::config)?;

        let recovered = match config.storage_level {
            StorageLevel::Disk => {
                fs::create_dir_all(&config.directory)?;
                load_segments(&config)?
            }
            StorageLevel::Memory => Vec::new(),
        };

        let log = Self {
            next_segment_id: AtomicU64::new(
                recovered.last().map(|s| s.id() + 1).unwrap_or(1),
            ),
            segments: RwLock::new(
                recovered
                    .into_iter()
                    .map(|s| (s.index(), Arc::new(s)))
                    .collect(),
            ),
            config,
            commit_index: AtomicU64::new(0),
            writer_open: AtomicBool::new(false),
            readers: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        };

        if log.segments.read().is_empty() {
            let segment = log.create_segment(FIRST_INDEX)?;
            log.segments.write().insert(segment.index(), segment);
        }

        tracing::info!(
            "Opened log {} ({:?}): {} segments, indexes {}..={}",
            log.config.name,
            log.config.storage_level,
            log.segment_count(),
            log.first_index(),
            log.last_index()
        );

        Ok(Arc::new(log))
    }

    /// Log configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Log name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether commits force a flush of the active segment
    pub fn is_flush_on_commit(&self) -> bool {
        self.config.flush_on_commit
    }

    /// Whether the log has not been closed
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the single writer
    ///
    /// Fails while another writer is open.
    pub fn writer(self: &Arc<Self>) -> Result<LogWriter> {
        if !self.is_open() {
            return Err(Error::closed(format!("log {}", self.config.name)));
        }
        if self.writer_open.swap(true, Ordering::SeqCst) {
            return Err(Error::internal(format!(
                "log {} already has an open writer",
                self.config.name
            )));
        }
        match self.last_segment() {
            Some(current) => Ok(LogWriter::new(self.clone(), current)),
            None => {
                self.writer_closed();
                Err(Error::internal(format!(
                    "log {} has no segments",
                    self.config.name
                )))
            }
        }
    }

    pub(crate) fn writer_closed(&self) {
        self.writer_open.store(false, Ordering::SeqCst);
    }

    /// Open a reader positioned at `index`
    pub fn reader(self: &Arc<Self>, index: Index, mode: ReadMode) -> LogReader {
        let cursor = Arc::new(Mutex::new(ReaderCursor::new(self, index)));
        let mut readers = self.readers.lock();
        readers.retain(|r| r.strong_count() > 0);
        readers.push(Arc::downgrade(&cursor));
        drop(readers);
        LogReader::new(self.clone(), cursor, mode)
    }

    /// Current commit index
    pub fn commit_index(&self) -> Index {
        self.commit_index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_commit_index(&self, index: Index) {
        self.commit_index.store(index, Ordering::SeqCst);
    }

    /// Index of the first entry in the log
    pub fn first_index(&self) -> Index {
        self.first_segment().map_or(FIRST_INDEX, |s| s.index())
    }

    /// Index of the last entry in the log, `first_index() - 1` when empty
    pub fn last_index(&self) -> Index {
        self.last_segment().map_or(0, |s| s.last_index())
    }

    /// Whether the log holds no entries
    pub fn is_empty(&self) -> bool {
        self.segments.read().values().all(|s| s.is_empty())
    }

    /// Entry at `index`
    pub fn get(&self, index: Index) -> Option<Indexed<Entry>> {
        self.segment(index)?.get(index)
    }

    /// First segment
    pub fn first_segment(&self) -> Option<Arc<Segment>> {
        self.segments.read().values().next().cloned()
    }

    /// Last (active) segment
    pub fn last_segment(&self) -> Option<Arc<Segment>> {
        self.segments.read().values().next_back().cloned()
    }

    /// Segment whose range starts at or before `index`
    pub fn segment(&self, index: Index) -> Option<Arc<Segment>> {
        self.segments
            .read()
            .range(..=index)
            .next_back()
            .map(|(_, s)| s.clone())
    }

    /// All segments in index order
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().values().cloned().collect()
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Create the segment following the last one
    pub fn next_segment(&self) -> Result<Arc<Segment>> {
        let last = self
            .last_segment()
            .ok_or_else(|| Error::internal(format!("log {} has no segments", self.config.name)))?;
        if last.is_empty() {
            return Err(Error::internal(format!(
                "cannot rotate past empty segment {}",
                last.id()
            )));
        }

        let segment = self.create_segment(last.next_index())?;
        self.segments.write().insert(segment.index(), segment.clone());

        tracing::debug!(
            "Log {} rolled over to segment {} at index {}",
            self.config.name,
            segment.id(),
            segment.index()
        );
        Ok(segment)
    }

    /// Remove a segment from the set and delete it once unreferenced
    pub fn remove_segment(&self, segment: &Arc<Segment>) {
        let mut segments = self.segments.write();
        if segments.len() <= 1 {
            return;
        }
        if let Some(existing) = segments.get(&segment.index()) {
            if Arc::ptr_eq(existing, segment) {
                segments.remove(&segment.index());
                segment.delete();
                tracing::debug!(
                    "Log {} removed segment {} at index {}",
                    self.config.name,
                    segment.id(),
                    segment.index()
                );
            }
        }
    }

    /// Discard every segment and start a fresh one at `index`
    pub fn reset_segments(&self, index: Index) -> Result<Arc<Segment>> {
        if index < FIRST_INDEX {
            return Err(Error::storage(format!(
                "Log {} cannot restart at index {}",
                self.config.name, index
            )));
        }
        let segment = self.create_segment(index)?;

        let old = {
            let mut segments = self.segments.write();
            let old = std::mem::take(&mut *segments);
            segments.insert(index, segment.clone());
            old
        };
        for old_segment in old.values() {
            old_segment.delete();
        }

        tracing::info!(
            "Log {} reset: {} segments discarded, next index {}",
            self.config.name,
            old.len(),
            index
        );
        Ok(segment)
    }

    /// Delete whole segments that end before the segment holding `index`
    ///
    /// Never removes entries above the commit index. Returns the number of
    /// segments removed.
    pub fn compact(&self, index: Index) -> usize {
        let bound = index.min(self.commit_index() + 1);
        let removed: Vec<Arc<Segment>> = {
            let mut segments = self.segments.write();
            let Some(keep_from) = segments.range(..=bound).next_back().map(|(k, _)| *k) else {
                return 0;
            };
            let head: Vec<Index> = segments.range(..keep_from).map(|(k, _)| *k).collect();
            head.into_iter()
                .filter_map(|k| segments.remove(&k))
                .collect()
        };
        if removed.is_empty() {
            return 0;
        }

        for segment in &removed {
            segment.delete();
        }
        let first = self.first_index();
        tracing::info!(
            "Log {} compacted {} segments, first index now {}",
            self.config.name,
            removed.len(),
            first
        );
        self.reset_head(first);
        removed.len()
    }

    /// Move readers positioned before `index` up to it
    pub fn reset_head(&self, index: Index) {
        for cursor in self.live_readers() {
            let mut cursor = cursor.lock();
            if cursor.next_index() < index {
                cursor.reset(self, index);
            }
        }
    }

    /// Move readers positioned at or beyond `index` back to it
    pub fn reset_tail(&self, index: Index) {
        for cursor in self.live_readers() {
            let mut cursor = cursor.lock();
            if cursor.next_index() >= index {
                cursor.reset(self, index);
            }
        }
    }

    fn live_readers(&self) -> Vec<Arc<Mutex<ReaderCursor>>> {
        let mut readers = self.readers.lock();
        readers.retain(|r| r.strong_count() > 0);
        readers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Close every segment
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        for segment in self.segments.read().values() {
            segment.close();
        }
        tracing::info!("Closed log {}", self.config.name);
    }

    fn create_segment(&self, index: Index) -> Result<Arc<Segment>> {
        let descriptor = SegmentDescriptor {
            id: self.next_segment_id.fetch_add(1, Ordering::SeqCst),
            index,
            max_size: self.config.max_segment_size,
            max_entries: self.config.max_entries_per_segment,
        };
        let segment = match self.config.storage_level {
            StorageLevel::Disk => {
                Segment::create(descriptor, segment_path(&self.config, descriptor.id))?
            }
            StorageLevel::Memory => Segment::memory(descriptor),
        };
        Ok(Arc::new(segment))
    }
}

impl Drop for SegmentedLog {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SegmentedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedLog")
            .field("name", &self.config.name)
            .field("segments", &self.segment_count())
            .field("commit_index", &self.commit_index())
            .finish()
    }
}

fn segment_path(config: &LogConfig, id: u64) -> PathBuf {
    config.directory.join(format!("{}-{}.log", config.name, id))
}

fn parse_segment_id(name: &str, path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(name)?
        .strip_prefix('-')?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Load segment files in ID order, dropping any that break the index chain
fn load_segments(config: &LogConfig) -> Result<Vec<Segment>> {
    let mut found = Vec::new();
    for dirent in fs::read_dir(&config.directory)? {
        let path = dirent?.path();
        if let Some(id) = parse_segment_id(&config.name, &path) {
            found.push((id, path));
        }
    }
    found.sort_by_key(|(id, _)| *id);

    let mut segments: Vec<Segment> = Vec::with_capacity(found.len());
    let mut chain_broken = false;
    for (id, path) in found {
        if chain_broken {
            tracing::warn!("Deleting orphaned segment {} ({})", id, path.display());
            fs::remove_file(&path)?;
            continue;
        }

        let segment = Segment::open(&path)?;
        if let Some(previous) = segments.last() {
            if segment.index() != previous.next_index() {
                tracing::warn!(
                    "Segment {} starts at index {} but segment {} ends at {}; discarding the rest of the log",
                    segment.id(),
                    segment.index(),
                    previous.id(),
                    previous.last_index()
                );
                chain_broken = true;
                segment.delete();
                continue;
            }
        }
        segments.push(segment);
    }

    Ok(segments)
}
