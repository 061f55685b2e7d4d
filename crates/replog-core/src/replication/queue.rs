//! Per-backup operation queue

use crate::storage::Index;
use replog_protocol::{BackupOperation, MemberId};
use std::collections::VecDeque;

/// FIFO of operations waiting to be shipped to one backup
///
/// At most one batch is in flight at a time. `acked_index` only moves
/// forward, and only when a batch is acknowledged.
#[derive(Debug)]
pub struct BackupQueue {
    member: MemberId,
    pending: VecDeque<BackupOperation>,
    in_progress: bool,
    /// The log was truncated to this index while a batch was in flight
    truncated_to: Option<Index>,
    acked_index: Index,
    max_batch_size: usize,
}

impl BackupQueue {
    /// Create an empty queue for `member`
    pub fn new(member: MemberId, max_batch_size: usize) -> Self {
        Self {
            member,
            pending: VecDeque::new(),
            in_progress: false,
            truncated_to: None,
            acked_index: 0,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Backup this queue feeds
    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// Highest index acknowledged by the backup
    pub fn acked_index(&self) -> Index {
        self.acked_index
    }

    /// Operations waiting to be sent
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether a batch is awaiting its response
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Queue an operation
    pub fn add(&mut self, operation: BackupOperation) {
        self.pending.push_back(operation);
    }

    /// Take the next batch if nothing is in flight
    pub fn next_batch(&mut self) -> Option<Vec<BackupOperation>> {
        if self.in_progress || self.pending.is_empty() {
            return None;
        }
        let count = self.pending.len().min(self.max_batch_size);
        self.in_progress = true;
        Some(self.pending.drain(..count).collect())
    }

    /// Record the outcome of the in-flight batch ending at `last_index`
    ///
    /// A failed batch is dropped; its operations are not sent again. If the
    /// log was truncated while the batch was in flight, only the part of the
    /// batch at or below the truncation index counts as acknowledged.
    pub fn complete(&mut self, last_index: Index, acknowledged: bool) {
        self.in_progress = false;
        let last_index = match self.truncated_to.take() {
            Some(index) => last_index.min(index),
            None => last_index,
        };
        if acknowledged {
            self.acked_index = self.acked_index.max(last_index);
        }
    }

    /// Forget every operation after `index`
    ///
    /// An acknowledgement for a batch already in flight counts up to `index`
    /// at most.
    pub fn truncate(&mut self, index: Index) {
        self.pending.retain(|op| op.index <= index);
        self.acked_index = self.acked_index.min(index);
        if self.in_progress {
            self.truncated_to = Some(self.truncated_to.map_or(index, |t| t.min(index)));
        }
    }
}
