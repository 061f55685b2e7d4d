//! Log entries and their indexed form

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use replog_protocol::{Index, Term};

/// An opaque payload plus the term it was written in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Term of the primary that wrote the entry
    pub term: Term,
    /// Opaque payload
    pub payload: Bytes,
}

impl Entry {
    /// Create an entry
    pub fn new(term: Term, payload: impl Into<Bytes>) -> Self {
        Self {
            term,
            payload: payload.into(),
        }
    }
}

/// An entry bound to its log index and serialized size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<E = Entry> {
    index: Index,
    entry: E,
    size: usize,
}

impl<E> Indexed<E> {
    /// Bind an entry to an index
    pub fn new(index: Index, entry: E, size: usize) -> Self {
        Self { index, entry, size }
    }

    /// Log index of the entry
    pub fn index(&self) -> Index {
        self.index
    }

    /// The entry itself
    pub fn entry(&self) -> &E {
        &self.entry
    }

    /// Serialized size in bytes, record header included
    pub fn size(&self) -> usize {
        self.size
    }

    /// Unwrap the entry
    pub fn into_entry(self) -> E {
        self.entry
    }
}

impl Indexed<Entry> {
    /// Term the entry was written in
    pub fn term(&self) -> Term {
        self.entry.term
    }
}
