//! Replication configuration

use crate::replication::{DEFAULT_MAX_BATCH_SIZE, LAG_WARNING_THRESHOLD};
use crate::storage::Term;
use replog_protocol::{MemberId, PrimitiveDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Replication configuration for one primary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// This member's ID
    pub member_id: MemberId,

    /// Primitive the replicated log belongs to
    pub primitive: PrimitiveDescriptor,

    /// Primary term stamped on every entry
    pub term: Term,

    /// Initial backup set
    pub backups: Vec<MemberId>,

    /// Maximum operations per backup request
    pub max_batch_size: usize,

    /// Prefix for protocol channel names
    pub channel_prefix: Option<String>,

    /// Lag (in operations) above which a backup is reported
    pub lag_warning_threshold: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            member_id: MemberId::new(uuid::Uuid::new_v4().to_string()),
            primitive: PrimitiveDescriptor::new("replog", "log"),
            term: 1,
            backups: Vec::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            channel_prefix: None,
            lag_warning_threshold: LAG_WARNING_THRESHOLD,
        }
    }
}

impl ReplicationConfig {
    /// Create a configuration for `member` replicating `primitive`
    pub fn new(member: impl Into<MemberId>, primitive: PrimitiveDescriptor) -> Self {
        Self {
            member_id: member.into(),
            primitive,
            ..Default::default()
        }
    }

    /// Set primary term
    pub fn with_term(mut self, term: Term) -> Self {
        self.term = term;
        self
    }

    /// Set initial backups
    pub fn with_backups<I, M>(mut self, backups: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberId>,
    {
        self.backups = backups.into_iter().map(Into::into).collect();
        self
    }

    /// Set batch size
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set channel prefix
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// Set lag warning threshold
    pub fn with_lag_warning_threshold(mut self, threshold: u64) -> Self {
        self.lag_warning_threshold = threshold;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.member_id.as_str().is_empty() {
            return Err("member_id must not be empty".into());
        }

        if self.primitive.name.is_empty() {
            return Err("primitive name must not be empty".into());
        }

        if self.max_batch_size == 0 {
            return Err("max_batch_size must be at least 1".into());
        }

        let mut seen = HashSet::new();
        for backup in &self.backups {
            if backup == &self.member_id {
                return Err(format!("member {} cannot back itself up", backup));
            }
            if !seen.insert(backup) {
                return Err(format!("duplicate backup {}", backup));
            }
        }

        Ok(())
    }
}
