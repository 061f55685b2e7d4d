//! Error types for replog core

use crate::storage::Index;
use thiserror::Error;

/// Result type alias using replog Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the log and the replicator
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from segment files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] replog_protocol::Error),

    /// Storage-related errors (corrupt segment, failed flush, ...)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Active segment cannot hold the entry; the writer rotates
    #[error("Segment {segment} is full at index {index}")]
    SegmentFull {
        /// Segment ID
        segment: u64,
        /// Index the entry would have received
        index: Index,
    },

    /// Entry does not fit even an empty segment
    #[error("Entry at index {index} is too large: {size} bytes, segment limit {max_size}")]
    EntryTooLarge {
        /// Index the entry would have received
        index: Index,
        /// Serialized entry size
        size: usize,
        /// Segment capacity
        max_size: u32,
    },

    /// Attempt to truncate committed entries
    #[error("Cannot truncate committed index: {index} (commit index {commit_index})")]
    InvalidTruncation {
        /// Requested truncation index
        index: Index,
        /// Current commit index
        commit_index: Index,
    },

    /// Pre-indexed append that does not continue the log
    #[error("Invalid index: expected {expected}, got {actual}")]
    InvalidIndex {
        /// Next index of the log
        expected: Index,
        /// Index carried by the entry
        actual: Index,
    },

    /// The node stopped being the primary before the operation committed
    #[error("Ownership lost: not the primary")]
    OwnershipLost,

    /// Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation on a closed log, writer or replicator
    #[error("Closed: {0}")]
    Closed(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a closed error
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error leaves the log unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Storage(_) | Self::EntryTooLarge { .. }
        )
    }
}
