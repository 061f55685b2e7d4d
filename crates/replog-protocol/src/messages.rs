//! Primary/backup protocol messages

use crate::{Index, Term};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cluster member
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    /// Create a member ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Client session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the replicated primitive a log belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimitiveDescriptor {
    /// Primitive name
    pub name: String,
    /// Primitive type name
    pub primitive_type: String,
}

impl PrimitiveDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, primitive_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primitive_type: primitive_type.into(),
        }
    }
}

/// Outcome reported by the receiving side of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Request was applied
    Ok,
    /// Request was rejected or failed
    Error,
}

/// A single logged operation shipped to a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOperation {
    /// Log index assigned by the primary
    pub index: Index,
    /// Term of the primary that logged it
    pub term: Term,
    /// Primary that logged it
    pub primary: MemberId,
    /// Name of the primitive the operation targets
    pub primitive: String,
    /// Opaque operation payload
    pub payload: Bytes,
}

/// Batch of operations sent from the primary to one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Primitive the batch belongs to
    pub primitive: PrimitiveDescriptor,
    /// Sending primary
    pub primary: MemberId,
    /// Primary's current term
    pub term: Term,
    /// Primary's commit index at send time
    pub commit_index: Index,
    /// Operations in log order
    pub operations: Vec<BackupOperation>,
}

impl BackupRequest {
    /// Index of the last operation in the batch, 0 if empty
    pub fn last_index(&self) -> Index {
        self.operations.last().map(|op| op.index).unwrap_or(0)
    }
}

/// Backup's answer to a [`BackupRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResponse {
    /// Whether the batch was stored
    pub status: ResponseStatus,
}

impl BackupResponse {
    /// Successful response
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
        }
    }

    /// Failed response
    pub fn error() -> Self {
        Self {
            status: ResponseStatus::Error,
        }
    }

    /// Whether the status is [`ResponseStatus::Ok`]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Request for the primary's current state, used by lagging backups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Primitive to restore
    pub primitive: PrimitiveDescriptor,
    /// Requester's term
    pub term: Term,
}

/// State snapshot returned to a restoring backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResponse {
    /// Outcome
    pub status: ResponseStatus,
    /// Index the snapshot covers
    pub index: Index,
    /// Wall-clock timestamp of the snapshot (ms since epoch)
    pub timestamp: u64,
    /// Opaque snapshot bytes
    pub data: Bytes,
}

/// Client operation forwarded to the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Target primitive
    pub primitive: PrimitiveDescriptor,
    /// Client session
    pub session: SessionId,
    /// Member the client is connected to
    pub node: MemberId,
    /// Opaque operation
    pub operation: Bytes,
}

/// Result of an [`ExecuteRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Outcome
    pub status: ResponseStatus,
    /// Opaque result
    pub result: Bytes,
}

/// Request to close a primitive on a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    /// Primitive to close
    pub primitive: PrimitiveDescriptor,
}

/// Result of a [`CloseRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseResponse {
    /// Outcome
    pub status: ResponseStatus,
}

/// Query for the primitives hosted by a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRequest {
    /// Restrict the answer to one primitive type
    pub primitive_type: Option<String>,
}

/// Result of a [`MetadataRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataResponse {
    /// Outcome
    pub status: ResponseStatus,
    /// Names of the matching primitives
    pub primitive_names: Vec<String>,
}

/// Event published to a client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEvent {
    /// Event type name
    pub event_type: String,
    /// Opaque event value
    pub value: Bytes,
}
