//! Log segments
//!
//! A segment holds a contiguous, bounded range of entries starting at its
//! descriptor's index. Entries are cached in memory and, for disk logs,
//! appended to the segment file behind a buffered write cursor.
//!
//! Segments are shared as `Arc<Segment>` between the log, its single writer
//! and any number of readers. Holders call [`Segment::acquire`] and
//! [`Segment::release`]; [`Segment::close`] and [`Segment::delete`] only mark
//! the segment, and the file is closed (and removed) once the last reference
//! is released.

use crate::error::{Error, Result};
use crate::storage::entry::{Entry, Index, Indexed};
use crate::storage::format::{self, HEADER_SIZE, RecordRead, SegmentDescriptor};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct SegmentState {
    entries: Vec<Indexed<Entry>>,
    /// File offset of each record
    positions: Vec<u64>,
    /// Write cursor: bytes in use, header included
    size: u64,
    file: Option<BufWriter<File>>,
}

/// A single segment of the log
pub struct Segment {
    descriptor: SegmentDescriptor,
    path: Option<PathBuf>,
    state: RwLock<SegmentState>,
    references: AtomicUsize,
    open: AtomicBool,
    deleted: AtomicBool,
    finished: AtomicBool,
}

impl Segment {
    /// Create a fresh segment file, replacing any file at `path`
    pub fn create(descriptor: SegmentDescriptor, path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&descriptor.encode())?;
        file.sync_all()?;

        tracing::debug!(
            "Created segment {} at index {} ({})",
            descriptor.id,
            descriptor.index,
            path.display()
        );

        Ok(Self::with_state(
            descriptor,
            Some(path),
            Vec::new(),
            Vec::new(),
            HEADER_SIZE as u64,
            Some(BufWriter::new(file)),
        ))
    }

    /// Create a segment that lives only in memory
    pub fn memory(descriptor: SegmentDescriptor) -> Self {
        Self::with_state(
            descriptor,
            None,
            Vec::new(),
            Vec::new(),
            HEADER_SIZE as u64,
            None,
        )
    }

    /// Open an existing segment file and replay its records
    ///
    /// A torn or corrupt record ends the segment: the file is truncated at
    /// the last good record.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let descriptor = SegmentDescriptor::decode(&data)?;

        let mut entries = Vec::new();
        let mut positions = Vec::new();
        let mut offset = HEADER_SIZE;
        loop {
            match format::decode_record(&data[offset..]) {
                RecordRead::Entry(entry, len) => {
                    let index = descriptor.index + entries.len() as u64;
                    positions.push(offset as u64);
                    entries.push(Indexed::new(index, entry, len));
                    offset += len;
                }
                RecordRead::End => break,
                RecordRead::Corrupt(reason) => {
                    tracing::warn!(
                        "Segment {} ({}): discarding tail at offset {}: {}",
                        descriptor.id,
                        path.display(),
                        offset,
                        reason
                    );
                    break;
                }
            }
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        if (offset as u64) < data.len() as u64 {
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(offset as u64))?;

        tracing::debug!(
            "Opened segment {} at index {} with {} entries",
            descriptor.id,
            descriptor.index,
            entries.len()
        );

        Ok(Self::with_state(
            descriptor,
            Some(path.to_path_buf()),
            entries,
            positions,
            offset as u64,
            Some(BufWriter::new(file)),
        ))
    }

    fn with_state(
        descriptor: SegmentDescriptor,
        path: Option<PathBuf>,
        entries: Vec<Indexed<Entry>>,
        positions: Vec<u64>,
        size: u64,
        file: Option<BufWriter<File>>,
    ) -> Self {
        Self {
            descriptor,
            path,
            state: RwLock::new(SegmentState {
                entries,
                positions,
                size,
                file,
            }),
            references: AtomicUsize::new(0),
            open: AtomicBool::new(true),
            deleted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Segment descriptor
    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    /// Segment ID
    pub fn id(&self) -> u64 {
        self.descriptor.id
    }

    /// Index of the first entry in the segment
    pub fn index(&self) -> Index {
        self.descriptor.index
    }

    /// Segment file path, `None` for memory segments
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the segment holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes in use, header included
    pub fn size(&self) -> u64 {
        self.state.read().size
    }

    /// Index of the last entry, `index() - 1` when empty
    pub fn last_index(&self) -> Index {
        (self.descriptor.index + self.len() as u64).saturating_sub(1)
    }

    /// Index the next append receives
    pub fn next_index(&self) -> Index {
        self.descriptor.index + self.len() as u64
    }

    /// Whether `index` falls inside the stored range
    pub fn contains(&self, index: Index) -> bool {
        index >= self.descriptor.index && index <= self.last_index()
    }

    /// Entry at `index`
    pub fn get(&self, index: Index) -> Option<Indexed<Entry>> {
        if index < self.descriptor.index {
            return None;
        }
        let offset = (index - self.descriptor.index) as usize;
        self.state.read().entries.get(offset).cloned()
    }

    /// Last entry in the segment
    pub fn last_entry(&self) -> Option<Indexed<Entry>> {
        self.state.read().entries.last().cloned()
    }

    /// Append an entry at the next index
    ///
    /// Fails with [`Error::SegmentFull`] when the entry does not fit.
    pub fn append(&self, entry: Entry) -> Result<Indexed<Entry>> {
        let mut state = self.state.write();
        let index = self.descriptor.index + state.entries.len() as u64;
        self.write_locked(&mut state, index, entry)
    }

    /// Append an entry whose index was assigned elsewhere
    pub fn append_indexed(&self, indexed: Indexed<Entry>) -> Result<Indexed<Entry>> {
        let mut state = self.state.write();
        let expected = self.descriptor.index + state.entries.len() as u64;
        if indexed.index() != expected {
            return Err(Error::InvalidIndex {
                expected,
                actual: indexed.index(),
            });
        }
        self.write_locked(&mut state, expected, indexed.into_entry())
    }

    fn write_locked(
        &self,
        state: &mut SegmentState,
        index: Index,
        entry: Entry,
    ) -> Result<Indexed<Entry>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::closed(format!("segment {}", self.descriptor.id)));
        }

        let record = format::encode_record(&entry)?;
        if state.entries.len() >= self.descriptor.max_entries as usize
            || state.size + record.len() as u64 > self.descriptor.max_size as u64
        {
            return Err(Error::SegmentFull {
                segment: self.descriptor.id,
                index,
            });
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(&record)?;
        }

        let position = state.size;
        let indexed = Indexed::new(index, entry, record.len());
        state.positions.push(position);
        state.entries.push(indexed.clone());
        state.size += record.len() as u64;
        Ok(indexed)
    }

    /// Remove every entry after `index`
    pub fn truncate(&self, index: Index) -> Result<()> {
        let mut state = self.state.write();
        let keep = if index < self.descriptor.index {
            0
        } else {
            ((index - self.descriptor.index + 1) as usize).min(state.entries.len())
        };
        if keep == state.entries.len() {
            return Ok(());
        }

        let new_size = state.positions[keep];
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
            let inner = file.get_mut();
            inner.set_len(new_size)?;
            inner.seek(SeekFrom::Start(new_size))?;
        }

        state.entries.truncate(keep);
        state.positions.truncate(keep);
        state.size = new_size;

        tracing::debug!(
            "Truncated segment {} to index {} ({} entries)",
            self.descriptor.id,
            index,
            keep
        );
        Ok(())
    }

    /// Write buffered records and sync them to stable storage
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Take a reference on the segment
    pub fn acquire(&self) {
        self.references.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop a reference; finishes a pending close when it was the last one
    pub fn release(&self) {
        let previous = self.references.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "segment {} released too often", self.id());
        if previous == 1 && !self.open.load(Ordering::SeqCst) {
            self.finish_close();
        }
    }

    /// Current reference count
    pub fn references(&self) -> usize {
        self.references.load(Ordering::SeqCst)
    }

    /// Whether the segment still accepts appends
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Whether the segment has been removed from the log
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Close the segment once no references remain
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if self.references() == 0 {
            self.finish_close();
        }
    }

    /// Close the segment and remove its file once no references remain
    pub fn delete(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.close();
    }

    fn finish_close(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        let file = self.state.write().file.take();
        if let Some(mut file) = file {
            if !self.is_deleted() {
                if let Err(e) = file.flush().and_then(|_| file.get_ref().sync_data()) {
                    tracing::error!("Failed to flush segment {} on close: {}", self.id(), e);
                }
            }
        }

        if self.is_deleted() {
            if let Some(path) = &self.path {
                match fs::remove_file(path) {
                    Ok(()) => tracing::debug!("Deleted segment {}", self.id()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::error!("Failed to delete segment {}: {}", path.display(), e)
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.descriptor.id)
            .field("index", &self.descriptor.index)
            .field("entries", &self.len())
            .field("references", &self.references())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use bytes::Bytes;

    fn descriptor(max_entries: u32) -> SegmentDescriptor {
        SegmentDescriptor {
            id: 1,
            index: 1,
            max_size: 4096,
            max_entries,
        }
    }

    #[test]
    fn test_append_assigns_sequential_indexes() {
        let segment = Segment::memory(descriptor(10));
        assert!(segment.is_empty());
        assert_eq!(segment.last_index(), 0);

        for expected in 1..=3 {
            let indexed = segment.append(Entry::new(1, vec![expected as u8])).unwrap();
            assert_eq!(indexed.index(), expected);
        }
        assert_eq!(segment.last_index(), 3);
        assert_eq!(segment.next_index(), 4);
        assert_eq!(segment.get(2).unwrap().entry().payload[0], 2);
        assert!(segment.get(4).is_none());
    }

    #[test]
    fn test_last_index_of_empty_segment_at_zero() {
        let segment = Segment::memory(SegmentDescriptor {
            index: 0,
            ..descriptor(10)
        });
        assert_eq!(segment.last_index(), 0);
        assert_eq!(segment.next_index(), 0);
    }

    #[test]
    fn test_segment_full_by_entries() {
        let segment = Segment::memory(descriptor(2));
        segment.append(Entry::new(1, vec![1])).unwrap();
        segment.append(Entry::new(1, vec![2])).unwrap();
        assert!(matches!(
            segment.append(Entry::new(1, vec![3])),
            Err(Error::SegmentFull { segment: 1, index: 3 })
        ));
        assert_eq!(segment.len(), 2);
    }

    #[test]
    fn test_segment_full_by_bytes() {
        let segment = Segment::memory(SegmentDescriptor {
            id: 1,
            index: 1,
            max_size: HEADER_SIZE as u32 + 64,
            max_entries: 100,
        });
        assert!(matches!(
            segment.append(Entry::new(1, vec![0u8; 128])),
            Err(Error::SegmentFull { .. })
        ));
    }

    #[test]
    fn test_append_indexed_checks_position() {
        let segment = Segment::memory(descriptor(10));
        let err = segment
            .append_indexed(Indexed::new(5, Entry::new(1, Bytes::new()), 0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIndex { expected: 1, actual: 5 }));
        segment
            .append_indexed(Indexed::new(1, Entry::new(1, Bytes::new()), 0))
            .unwrap();
    }

    #[test]
    fn test_truncate_and_reopen() {
        let ctx = TestContext::new();
        let path = ctx.path().join("test-1.log");

        let segment = Segment::create(descriptor(10), path.clone()).unwrap();
        for i in 1..=5u8 {
            segment.append(Entry::new(1, vec![i; 16])).unwrap();
        }
        segment.truncate(3).unwrap();
        assert_eq!(segment.last_index(), 3);
        segment.append(Entry::new(2, vec![9; 16])).unwrap();
        segment.flush().unwrap();
        segment.close();

        let reopened = Segment::open(&path).unwrap();
        assert_eq!(reopened.last_index(), 4);
        assert_eq!(reopened.get(3).unwrap().term(), 1);
        assert_eq!(reopened.get(4).unwrap().term(), 2);
        assert_eq!(reopened.size(), segment.size());
    }

    #[test]
    fn test_truncate_before_first_index_empties_segment() {
        let segment = Segment::memory(SegmentDescriptor {
            id: 2,
            index: 10,
            max_size: 4096,
            max_entries: 10,
        });
        segment.append(Entry::new(1, vec![1])).unwrap();
        segment.truncate(3).unwrap();
        assert!(segment.is_empty());
        assert_eq!(segment.last_index(), 9);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let ctx = TestContext::new();
        let path = ctx.path().join("test-1.log");

        let segment = Segment::create(descriptor(10), path.clone()).unwrap();
        segment.append(Entry::new(1, vec![1; 32])).unwrap();
        segment.append(Entry::new(1, vec![2; 32])).unwrap();
        segment.flush().unwrap();
        let good_size = segment.size();
        segment.close();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let reopened = Segment::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_size);
    }

    #[test]
    fn test_delete_deferred_until_release() {
        let ctx = TestContext::new();
        let path = ctx.path().join("test-1.log");

        let segment = Segment::create(descriptor(10), path.clone()).unwrap();
        segment.acquire();
        segment.delete();
        assert!(path.exists());
        assert!(!segment.is_open());

        segment.release();
        assert!(!path.exists());
        assert_eq!(segment.references(), 0);
    }

    #[test]
    fn test_closed_segment_rejects_appends() {
        let segment = Segment::memory(descriptor(10));
        segment.close();
        assert!(matches!(
            segment.append(Entry::new(1, Bytes::new())),
            Err(Error::Closed(_))
        ));
    }
}
