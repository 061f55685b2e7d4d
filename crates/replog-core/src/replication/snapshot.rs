//! Committed entries carried by a restore response

use crate::error::{Error, Result};
use crate::storage::{Entry, Index, ReadMode, SegmentedLog};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Contiguous run of committed entries starting at `first_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedLog {
    /// Index of the first entry
    pub first_index: Index,
    /// Entries in index order
    pub entries: Vec<Entry>,
}

impl CommittedLog {
    /// Read every retained entry of `log` up to `commit_index`
    pub fn read(log: &Arc<SegmentedLog>, commit_index: Index) -> Result<Self> {
        let first_index = log.first_index();
        let mut entries = Vec::new();
        for indexed in log.reader(first_index, ReadMode::Commits) {
            if indexed.index() > commit_index {
                break;
            }
            let expected = first_index + entries.len() as u64;
            if indexed.index() != expected {
                return Err(Error::storage(format!(
                    "Log {} changed while reading committed entries: expected index {}, got {}",
                    log.name(),
                    expected,
                    indexed.index()
                )));
            }
            entries.push(indexed.into_entry());
        }
        Ok(Self {
            first_index,
            entries,
        })
    }

    /// Index of the last entry, or `first_index - 1` when empty
    pub fn last_index(&self) -> Index {
        (self.first_index + self.entries.len() as u64).saturating_sub(1)
    }

    /// Entries paired with their indexes
    pub fn iter(&self) -> impl Iterator<Item = (Index, &Entry)> {
        (self.first_index..).zip(self.entries.iter())
    }

    /// Serialize for a restore response
    pub fn encode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| Error::storage(format!("Serialization failed: {}", e)))
    }

    /// Parse the data of a restore response
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::replication(format!("Undecodable restore data: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_log;

    #[test]
    fn test_reads_only_committed_entries() {
        let log = memory_log("snapshot", 2);
        let mut writer = log.writer().unwrap();
        for i in 1..=5u8 {
            writer.append(Entry::new(1, vec![i])).unwrap();
        }
        writer.commit(3).unwrap();

        let committed = CommittedLog::read(&log, log.commit_index()).unwrap();
        assert_eq!(committed.first_index, 1);
        assert_eq!(committed.last_index(), 3);
        let payloads: Vec<u8> = committed.iter().map(|(_, e)| e.payload[0]).collect();
        assert_eq!(payloads, vec![1, 2, 3]);

        let decoded = CommittedLog::decode(&committed.encode().unwrap()).unwrap();
        assert_eq!(decoded, committed);
    }

    #[test]
    fn test_starts_after_compaction() {
        let log = memory_log("snapshot", 2);
        let mut writer = log.writer().unwrap();
        for i in 1..=6u8 {
            writer.append(Entry::new(1, vec![i])).unwrap();
        }
        writer.commit(6).unwrap();
        log.compact(5);

        let committed = CommittedLog::read(&log, 6).unwrap();
        assert_eq!(committed.first_index, log.first_index());
        assert_eq!(committed.last_index(), 6);
        assert_eq!(committed.iter().next().unwrap().0, log.first_index());
    }

    #[test]
    fn test_empty_log() {
        let log = memory_log("snapshot", 2);
        let committed = CommittedLog::read(&log, 0).unwrap();
        assert!(committed.entries.is_empty());
        assert_eq!(committed.last_index(), 0);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            CommittedLog::decode(&[0xff, 0xff, 0xff]),
            Err(Error::Replication(_))
        ));
    }
}
