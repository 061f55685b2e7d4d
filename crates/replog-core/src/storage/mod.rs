//! Segmented log storage
//!
//! The log is an ordered set of bounded segments. Each segment covers a
//! contiguous index range and starts where the previous one ends:
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ segment 1    │ │ segment 2    │ │ segment 3    │ ◄── writer
//! │ index 1..=4  │ │ index 5..=8  │ │ index 9..    │
//! └──────────────┘ └──────────────┘ └──────────────┘
//!        ▲                 ▲
//!     reader            reader
//! ```
//!
//! - A single [`LogWriter`] appends to the last segment and rotates to a new
//!   one when it fills up.
//! - Any number of [`LogReader`]s iterate forward, optionally bounded by the
//!   commit index.
//! - Segments are reference counted; removal during truncation, reset or
//!   compaction is deferred until the last holder releases them.
//!
//! See [`format`] for the segment file layout.

pub mod config;
pub mod entry;
pub mod format;
pub mod log;
pub mod reader;
pub mod segment;
pub mod writer;

pub use config::{LogConfig, StorageLevel};
pub use entry::{Entry, Index, Indexed, Term};
pub use log::{FIRST_INDEX, SegmentedLog};
pub use reader::{LogReader, ReadMode};
pub use segment::Segment;
pub use writer::LogWriter;
