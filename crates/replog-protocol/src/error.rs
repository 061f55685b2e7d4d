//! Error types for the replog wire protocol

use crate::codec::MessageType;
use thiserror::Error;

/// Result type alias using the protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while framing or parsing protocol messages
#[derive(Error, Debug)]
pub enum Error {
    /// Payload could not be serialized
    #[error("Serialization failed: {0}")]
    Encode(String),

    /// Payload could not be deserialized
    #[error("Deserialization failed: {0}")]
    Decode(String),

    /// Frame checksum does not match its contents
    #[error("CRC mismatch: expected {expected:x}, got {actual:x}")]
    Checksum {
        /// Checksum stored in the frame
        expected: u32,
        /// Checksum computed over the frame
        actual: u32,
    },

    /// Frame is shorter than its header claims
    #[error("Incomplete message: need {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Type byte is not a known message type
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Frame carries a different message than the caller expected
    #[error("Unexpected message type: expected {expected:?}, got {actual:?}")]
    UnexpectedMessageType {
        /// Type the caller asked for
        expected: MessageType,
        /// Type found in the frame
        actual: MessageType,
    },
}

impl Error {
    /// Create an encode error
    pub fn encode(msg: impl ToString) -> Self {
        Self::Encode(msg.to_string())
    }

    /// Create a decode error
    pub fn decode(msg: impl ToString) -> Self {
        Self::Decode(msg.to_string())
    }
}
