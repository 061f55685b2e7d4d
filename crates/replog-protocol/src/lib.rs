//! replog Protocol - primary/backup messages exchanged over a transport
//!
//! Provides:
//! - Request/response types for the backup, restore, execute, close and
//!   metadata channels, plus session events
//! - Channel naming ([`MessageContext`]) with an optional per-log prefix
//! - A checksummed frame codec for every message type
//!
//! # Wire Format
//!
//! ```text
//! [message_type:1][length:4][payload:N][crc32:4]
//! ```
//!
//! The payload is bincode; the CRC32 covers type, length and payload.

#![warn(clippy::all)]

pub mod channels;
pub mod codec;
pub mod error;
pub mod messages;

pub use channels::MessageContext;
pub use codec::{MessageType, WireMessage};
pub use error::{Error, Result};
pub use messages::{
    BackupEvent, BackupOperation, BackupRequest, BackupResponse, CloseRequest, CloseResponse,
    ExecuteRequest, ExecuteResponse, MemberId, MetadataRequest, MetadataResponse,
    PrimitiveDescriptor, ResponseStatus, RestoreRequest, RestoreResponse, SessionId,
};

/// Position of an entry in the log. Index 0 precedes the first entry.
pub type Index = u64;

/// Epoch of the primary that produced an entry.
pub type Term = u64;
