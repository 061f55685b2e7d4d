//! replog Core - segmented durable log with synchronous primary/backup
//! replication
//!
//! This crate provides:
//! - A segmented, append-only log with bounded segments, crash recovery and
//!   reference-counted segment lifetime ([`storage`])
//! - A synchronous replicator that commits an entry once every backup holds
//!   it, plus the primary actor and backup handler around it
//!   ([`replication`])
//! - The transport seam and an in-process implementation ([`transport`])
//!
//! # Example
//!
//! ```rust,no_run
//! use replog_core::replication::{ReplicatedLog, ReplicationConfig};
//! use replog_core::storage::{LogConfig, SegmentedLog};
//! use replog_core::transport::{LocalNetwork, ServerCommunicator};
//! use replog_protocol::PrimitiveDescriptor;
//! use std::sync::Arc;
//!
//! # async fn example() -> replog_core::Result<()> {
//! let network = LocalNetwork::new();
//! let communicator = ServerCommunicator::new(Some("counter"), network.transport("node-1"));
//! let log = SegmentedLog::open(LogConfig::new("counter", "./data"))?;
//!
//! let config = ReplicationConfig::new("node-1", PrimitiveDescriptor::new("counter", "counter"))
//!     .with_backups(["node-2"]);
//! let primary = ReplicatedLog::start(config, log, Arc::new(communicator))?;
//! let _index = primary.append_and_commit(&b"increment"[..]).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod replication;
pub mod storage;
pub mod testing;
pub mod transport;

pub use error::{Error, Result};
pub use replication::{BackupRole, ReplicatedLog, ReplicationConfig};
pub use storage::{Entry, Index, LogConfig, SegmentedLog, Term};
