//! On-disk segment format
//!
//! ```text
//! header:  [magic:4 "RLSG"][version:1][id:8][index:8][max_size:4][max_entries:4][reserved:3]
//! record:  [length:4][crc32:4][bincode(Entry):length]
//! ```
//!
//! All integers are little endian. The CRC32 covers the record payload only.

use crate::error::{Error, Result};
use crate::storage::entry::{Entry, Index};

/// Segment file magic
pub const SEGMENT_MAGIC: &[u8; 4] = b"RLSG";

/// Segment format version
pub const SEGMENT_VERSION: u8 = 1;

/// Size of the segment header in bytes
pub const HEADER_SIZE: usize = 32;

/// Size of a record header (length + crc32)
pub const RECORD_HEADER_SIZE: usize = 8;

/// Identity and limits of a segment, persisted in its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Segment ID, increasing across the life of the log
    pub id: u64,
    /// Index of the first entry stored in the segment
    pub index: Index,
    /// Capacity in bytes, header included
    pub max_size: u32,
    /// Maximum number of entries
    pub max_entries: u32,
}

impl SegmentDescriptor {
    /// Encode the header
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(SEGMENT_MAGIC);
        buf[4] = SEGMENT_VERSION;
        buf[5..13].copy_from_slice(&self.id.to_le_bytes());
        buf[13..21].copy_from_slice(&self.index.to_le_bytes());
        buf[21..25].copy_from_slice(&self.max_size.to_le_bytes());
        buf[25..29].copy_from_slice(&self.max_entries.to_le_bytes());
        buf
    }

    /// Decode and validate a header
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::storage(format!(
                "Segment header too short: {} bytes",
                buf.len()
            )));
        }

        if &buf[0..4] != SEGMENT_MAGIC {
            return Err(Error::storage("Invalid segment magic"));
        }

        if buf[4] != SEGMENT_VERSION {
            return Err(Error::storage(format!(
                "Unsupported segment version: {}",
                buf[4]
            )));
        }

        let index = u64::from_le_bytes(le_array(&buf[13..21]));
        if index == 0 {
            return Err(Error::storage("Segment header has first index 0"));
        }

        Ok(Self {
            id: u64::from_le_bytes(le_array(&buf[5..13])),
            index,
            max_size: u32::from_le_bytes(le_array(&buf[21..25])),
            max_entries: u32::from_le_bytes(le_array(&buf[25..29])),
        })
    }
}

/// Outcome of reading one record from a buffer
#[derive(Debug)]
pub enum RecordRead {
    /// A valid record and its total length in bytes
    Entry(Entry, usize),
    /// No bytes left
    End,
    /// Partial or corrupt record; everything from here on is discarded
    Corrupt(String),
}

/// Encode an entry as a record
pub fn encode_record(entry: &Entry) -> Result<Vec<u8>> {
    let payload = bincode::serialize(entry)
        .map_err(|e| Error::storage(format!("Serialization failed: {}", e)))?;

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Size of the record an entry would occupy
pub fn record_size(entry: &Entry) -> Result<usize> {
    let payload = bincode::serialized_size(entry)
        .map_err(|e| Error::storage(format!("Serialization failed: {}", e)))?;
    Ok(RECORD_HEADER_SIZE + payload as usize)
}

/// Read the record at the start of `buf`
pub fn decode_record(buf: &[u8]) -> RecordRead {
    if buf.is_empty() {
        return RecordRead::End;
    }

    if buf.len() < RECORD_HEADER_SIZE {
        return RecordRead::Corrupt(format!("partial record header ({} bytes)", buf.len()));
    }

    let length = u32::from_le_bytes(le_array(&buf[0..4])) as usize;
    let stored_crc = u32::from_le_bytes(le_array(&buf[4..8]));
    let total = RECORD_HEADER_SIZE + length;

    if buf.len() < total {
        return RecordRead::Corrupt(format!(
            "record needs {} bytes, {} available",
            total,
            buf.len()
        ));
    }

    let payload = &buf[RECORD_HEADER_SIZE..total];
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return RecordRead::Corrupt(format!(
            "CRC mismatch: stored={:x}, calculated={:x}",
            stored_crc, computed_crc
        ));
    }

    match bincode::deserialize(payload) {
        Ok(entry) => RecordRead::Entry(entry, total),
        Err(e) => RecordRead::Corrupt(format!("undecodable record: {}", e)),
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header() {
        let descriptor = SegmentDescriptor {
            id: 7,
            index: 1001,
            max_size: 4096,
            max_entries: 64,
        };
        let header = descriptor.encode();
        assert_eq!(&header[0..4], SEGMENT_MAGIC);
        assert_eq!(SegmentDescriptor::decode(&header).unwrap(), descriptor);
    }

    #[test]
    fn test_bad_magic() {
        let mut header = SegmentDescriptor {
            id: 1,
            index: 1,
            max_size: 4096,
            max_entries: 64,
        }
        .encode();
        header[0] = b'X';
        assert!(SegmentDescriptor::decode(&header).is_err());
    }

    #[test]
    fn test_zero_first_index_is_rejected() {
        let header = SegmentDescriptor {
            id: 1,
            index: 0,
            max_size: 4096,
            max_entries: 64,
        }
        .encode();
        assert!(matches!(
            SegmentDescriptor::decode(&header),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_record_size_matches_encoding() {
        let entry = Entry::new(3, &b"hello world"[..]);
        let record = encode_record(&entry).unwrap();
        assert_eq!(record.len(), record_size(&entry).unwrap());

        match decode_record(&record) {
            RecordRead::Entry(decoded, len) => {
                assert_eq!(decoded, entry);
                assert_eq!(len, record.len());
            }
            other => panic!("unexpected read: {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_record() {
        let mut record = encode_record(&Entry::new(1, &b"payload"[..])).unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        assert!(matches!(decode_record(&record), RecordRead::Corrupt(_)));
    }

    #[test]
    fn test_torn_record() {
        let record = encode_record(&Entry::new(1, &b"payload"[..])).unwrap();
        assert!(matches!(
            decode_record(&record[..record.len() - 3]),
            RecordRead::Corrupt(_)
        ));
        assert!(matches!(decode_record(&record[..5]), RecordRead::Corrupt(_)));
        assert!(matches!(decode_record(&[]), RecordRead::End));
    }
}
