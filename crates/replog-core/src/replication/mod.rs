//! Synchronous primary/backup replication
//!
//! The primary appends to its log and ships every entry to all backups. An
//! entry commits once each backup has acknowledged it:
//!
//! ```text
//! ┌─────────────────┐   BackupRequest    ┌─────────────────┐
//! │     Primary     │ ─────────────────► │    Backup 1     │
//! │  ReplicatedLog  │ ◄───── ack ─────── │   BackupRole    │
//! │                 │                    └─────────────────┘
//! │  commit = min   │   BackupRequest    ┌─────────────────┐
//! │  of acked index │ ─────────────────► │    Backup 2     │
//! │                 │ ◄───── ack ─────── │   BackupRole    │
//! └─────────────────┘                    └─────────────────┘
//! ```
//!
//! Each backup gets its own queue with at most one batch in flight. A failed
//! batch is dropped, not retried; the backup stalls the commit index until
//! it is removed from the backup set. A removed backup catches up through a
//! restore request served by the primary ([`BackupRole::resync`]) before it
//! is added back.

pub mod backup;
pub mod config;
pub mod primary;
pub mod queue;
pub mod replicator;
pub mod snapshot;

pub use backup::BackupRole;
pub use config::ReplicationConfig;
pub use primary::{Appended, ReplicatedLog};
pub use queue::BackupQueue;
pub use replicator::{
    BackupStatus, CompletionHandle, ReplicationContext, ReplicationStatus, SynchronousReplicator,
};
pub use snapshot::CommittedLog;

/// Default maximum number of operations per backup request
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Replication lag threshold for warnings (in operations)
pub const LAG_WARNING_THRESHOLD: u64 = 10_000;
