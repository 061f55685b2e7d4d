//! Frame codec
//!
//! Format: [message_type:1][length:4][payload:N][crc32:4]

use crate::error::{Error, Result};
use crate::messages::*;
use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher;
use serde::Serialize;
use serde::de::DeserializeOwned;

const HEADER_LEN: usize = 5;
const CRC_LEN: usize = 4;

/// Message types carried in the first byte of a frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Batch of operations for a backup
    BackupRequest = 0x01,
    /// Backup acknowledgment
    BackupResponse = 0x02,
    /// Restore request
    RestoreRequest = 0x10,
    /// Restore response
    RestoreResponse = 0x11,
    /// Execute request
    ExecuteRequest = 0x20,
    /// Execute response
    ExecuteResponse = 0x21,
    /// Close request
    CloseRequest = 0x30,
    /// Close response
    CloseResponse = 0x31,
    /// Metadata request
    MetadataRequest = 0x40,
    /// Metadata response
    MetadataResponse = 0x41,
    /// Session event
    Event = 0x50,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::BackupRequest),
            0x02 => Ok(Self::BackupResponse),
            0x10 => Ok(Self::RestoreRequest),
            0x11 => Ok(Self::RestoreResponse),
            0x20 => Ok(Self::ExecuteRequest),
            0x21 => Ok(Self::ExecuteResponse),
            0x30 => Ok(Self::CloseRequest),
            0x31 => Ok(Self::CloseResponse),
            0x40 => Ok(Self::MetadataRequest),
            0x41 => Ok(Self::MetadataResponse),
            0x50 => Ok(Self::Event),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// A message that can be framed for the transport
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Type byte written in front of the payload
    const MESSAGE_TYPE: MessageType;

    /// Encode into a checksummed frame
    fn encode(&self) -> Result<Bytes> {
        encode(self)
    }

    /// Decode from a checksummed frame
    fn decode(buf: &[u8]) -> Result<Self> {
        decode(buf)
    }
}

macro_rules! wire_message {
    ($($ty:ident => $tag:ident),* $(,)?) => {
        $(impl WireMessage for $ty {
            const MESSAGE_TYPE: MessageType = MessageType::$tag;
        })*
    };
}

wire_message! {
    BackupRequest => BackupRequest,
    BackupResponse => BackupResponse,
    RestoreRequest => RestoreRequest,
    RestoreResponse => RestoreResponse,
    ExecuteRequest => ExecuteRequest,
    ExecuteResponse => ExecuteResponse,
    CloseRequest => CloseRequest,
    CloseResponse => CloseResponse,
    MetadataRequest => MetadataRequest,
    MetadataResponse => MetadataResponse,
    BackupEvent => Event,
}

/// Encode a message into a frame
pub fn encode<M: WireMessage>(message: &M) -> Result<Bytes> {
    let payload = bincode::serialize(message).map_err(Error::encode)?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    buf.put_u8(M::MESSAGE_TYPE as u8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);

    // CRC32 of type + length + payload
    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.put_u32_le(hasher.finalize());

    Ok(buf.freeze())
}

/// Read the message type of a frame without decoding it
pub fn peek_type(buf: &[u8]) -> Result<MessageType> {
    match buf.first() {
        Some(&tag) => MessageType::try_from(tag),
        None => Err(Error::Truncated {
            needed: HEADER_LEN + CRC_LEN,
            actual: 0,
        }),
    }
}

/// Decode a frame, checking checksum and message type
pub fn decode<M: WireMessage>(buf: &[u8]) -> Result<M> {
    if buf.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::Truncated {
            needed: HEADER_LEN + CRC_LEN,
            actual: buf.len(),
        });
    }

    let length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let frame_len = HEADER_LEN + length + CRC_LEN;
    if buf.len() < frame_len {
        return Err(Error::Truncated {
            needed: frame_len,
            actual: buf.len(),
        });
    }

    let crc_offset = HEADER_LEN + length;
    let stored = u32::from_le_bytes([
        buf[crc_offset],
        buf[crc_offset + 1],
        buf[crc_offset + 2],
        buf[crc_offset + 3],
    ]);
    let mut hasher = Hasher::new();
    hasher.update(&buf[..crc_offset]);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(Error::Checksum {
            expected: stored,
            actual: computed,
        });
    }

    let actual = MessageType::try_from(buf[0])?;
    if actual != M::MESSAGE_TYPE {
        return Err(Error::UnexpectedMessageType {
            expected: M::MESSAGE_TYPE,
            actual,
        });
    }

    bincode::deserialize(&buf[HEADER_LEN..crc_offset]).map_err(Error::decode)
}
