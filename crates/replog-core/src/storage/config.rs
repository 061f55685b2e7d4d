//! Log configuration

use crate::storage::format::HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default segment capacity in bytes (32 MiB)
pub const DEFAULT_MAX_SEGMENT_SIZE: u32 = 32 * 1024 * 1024;

/// Default maximum number of entries per segment
pub const DEFAULT_MAX_ENTRIES_PER_SEGMENT: u32 = 1024 * 1024;

/// Where segment contents live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLevel {
    /// Segment files on disk
    Disk,
    /// Heap only, lost on restart
    Memory,
}

impl Default for StorageLevel {
    fn default() -> Self {
        Self::Disk
    }
}

/// Segmented log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log name, used as the segment file prefix
    pub name: String,

    /// Directory holding segment files
    pub directory: PathBuf,

    /// Storage level
    pub storage_level: StorageLevel,

    /// Segment capacity in bytes, header included
    pub max_segment_size: u32,

    /// Maximum number of entries per segment
    pub max_entries_per_segment: u32,

    /// Flush the active segment every time the commit index advances
    pub flush_on_commit: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: "replog".to_string(),
            directory: PathBuf::from("./data"),
            storage_level: StorageLevel::Disk,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_entries_per_segment: DEFAULT_MAX_ENTRIES_PER_SEGMENT,
            flush_on_commit: false,
        }
    }
}

impl LogConfig {
    /// Create a disk configuration
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Create an in-memory configuration
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_level: StorageLevel::Memory,
            ..Default::default()
        }
    }

    /// Set storage level
    pub fn with_storage_level(mut self, level: StorageLevel) -> Self {
        self.storage_level = level;
        self
    }

    /// Set segment capacity in bytes
    pub fn with_max_segment_size(mut self, size: u32) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set maximum entries per segment
    pub fn with_max_entries_per_segment(mut self, entries: u32) -> Self {
        self.max_entries_per_segment = entries;
        self
    }

    /// Enable/disable flush on commit
    pub fn with_flush_on_commit(mut self, enabled: bool) -> Self {
        self.flush_on_commit = enabled;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }

        if self.name.contains(std::path::MAIN_SEPARATOR) || self.name.contains('/') {
            return Err("name must not contain path separators".into());
        }

        if (self.max_segment_size as usize) <= HEADER_SIZE {
            return Err(format!(
                "max_segment_size must exceed the {} byte segment header",
                HEADER_SIZE
            ));
        }

        if self.max_entries_per_segment == 0 {
            return Err("max_entries_per_segment must be at least 1".into());
        }

        Ok(())
    }
}
