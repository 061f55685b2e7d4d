//! Segmented log integration tests
//!
//! Covers the log through its public API:
//! - Rotation and reads across segments
//! - Recovery after reopen, including torn tails
//! - Truncation and reader repositioning
//! - Compaction and deferred segment deletion

use replog_core::Error;
use replog_core::storage::{Entry, LogConfig, ReadMode, SegmentedLog, StorageLevel};
use replog_core::testing::{TestContext, disk_log, memory_log};
use std::fs;

fn payload(i: u64) -> Vec<u8> {
    format!("entry-{}", i).into_bytes()
}

#[test]
fn test_capacity_two_rotates_once() {
    let log = memory_log("rotation", 2);
    let mut writer = log.writer().unwrap();
    for i in 1..=3 {
        assert_eq!(writer.append(Entry::new(1, payload(i))).unwrap().index(), i);
    }

    assert_eq!(writer.last_index(), 3);
    let segments = log.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!((segments[0].index(), segments[0].len()), (1, 2));
    assert_eq!((segments[1].index(), segments[1].len()), (3, 1));
}

#[test]
fn test_byte_capacity_rotation() {
    let log = SegmentedLog::open(LogConfig::memory("bytes").with_max_segment_size(160)).unwrap();
    let mut writer = log.writer().unwrap();
    for i in 1..=10 {
        writer.append(Entry::new(1, vec![0u8; 32])).unwrap();
        assert_eq!(writer.last_index(), i);
    }
    assert!(log.segment_count() > 1);
    for segment in log.segments() {
        assert!(segment.size() <= 160);
    }

    let indexes: Vec<u64> = log.reader(1, ReadMode::All).map(|e| e.index()).collect();
    assert_eq!(indexes, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_disk_log_survives_reopen() {
    let ctx = TestContext::new();
    {
        let log = disk_log(&ctx, "journal", 4);
        let mut writer = log.writer().unwrap();
        for i in 1..=10 {
            writer.append(Entry::new(i / 4 + 1, payload(i))).unwrap();
        }
        writer.close().unwrap();
    }

    let log = disk_log(&ctx, "journal", 4);
    assert_eq!(log.config().storage_level, StorageLevel::Disk);
    assert_eq!(log.first_index(), 1);
    assert_eq!(log.last_index(), 10);
    assert_eq!(log.segment_count(), 3);
    assert_eq!(log.commit_index(), 0);

    for entry in log.reader(1, ReadMode::All) {
        assert_eq!(entry.entry().payload, payload(entry.index()));
        assert_eq!(entry.term(), entry.index() / 4 + 1);
    }
}

#[test]
fn test_torn_tail_is_dropped_on_reopen() {
    let ctx = TestContext::new();
    {
        let log = disk_log(&ctx, "torn", 100);
        let mut writer = log.writer().unwrap();
        for i in 1..=5 {
            writer.append(Entry::new(1, payload(i))).unwrap();
        }
        writer.close().unwrap();
    }

    // Flip a byte inside the last record
    let path = ctx.path().join("torn-1.log");
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 0xAA;
    fs::write(&path, &bytes).unwrap();

    let log = disk_log(&ctx, "torn", 100);
    assert_eq!(log.last_index(), 4);

    let mut writer = log.writer().unwrap();
    assert_eq!(writer.append(Entry::new(2, payload(5))).unwrap().index(), 5);
    writer.close().unwrap();
    drop(log);

    let log = disk_log(&ctx, "torn", 100);
    assert_eq!(log.last_index(), 5);
    assert_eq!(log.get(5).unwrap().term(), 2);
}

#[test]
fn test_truncate_then_append() {
    let log = memory_log("truncate", 3);
    let mut writer = log.writer().unwrap();
    for i in 1..=8 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }
    writer.commit(4).unwrap();

    assert!(matches!(
        writer.truncate(3),
        Err(Error::InvalidTruncation {
            index: 3,
            commit_index: 4
        })
    ));
    assert_eq!(writer.last_index(), 8);

    writer.truncate(5).unwrap();
    assert_eq!(writer.last_index(), 5);
    assert_eq!(log.segment_count(), 2);
    assert_eq!(writer.append(Entry::new(2, payload(6))).unwrap().index(), 6);
    assert_eq!(log.get(6).unwrap().term(), 2);
}

#[test]
fn test_reader_moved_back_by_truncation() {
    let log = memory_log("readers", 2);
    let mut writer = log.writer().unwrap();
    for i in 1..=6 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }

    let mut ahead = log.reader(1, ReadMode::All);
    assert_eq!(ahead.by_ref().count(), 6);
    let mut behind = log.reader(2, ReadMode::All);

    writer.truncate(3).unwrap();
    assert_eq!(ahead.next_index(), 4);
    assert_eq!(behind.next_index(), 2);
    assert_eq!(behind.by_ref().map(|e| e.index()).collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn test_commits_reader_follows_commit_index() {
    let log = memory_log("commits", 2);
    let mut writer = log.writer().unwrap();
    let mut reader = log.reader(1, ReadMode::Commits);

    for i in 1..=4 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }
    assert!(!reader.has_next());

    writer.commit(2).unwrap();
    assert_eq!(reader.by_ref().count(), 2);

    writer.commit(4).unwrap();
    assert_eq!(reader.next().unwrap().index(), 3);
    assert_eq!(reader.next().unwrap().index(), 4);
    assert!(reader.next().is_none());
}

#[test]
fn test_flush_on_commit() {
    let ctx = TestContext::new();
    let config = LogConfig::new("durable", ctx.path())
        .with_flush_on_commit(true)
        .with_max_entries_per_segment(100);
    let log = SegmentedLog::open(config.clone()).unwrap();
    let mut writer = log.writer().unwrap();
    for i in 1..=3 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }
    writer.commit(3).unwrap();

    // Records are on disk without closing the writer
    let reopened = SegmentedLog::open(config.with_storage_level(StorageLevel::Disk)).unwrap();
    assert_eq!(reopened.last_index(), 3);
}

#[test]
fn test_compaction_defers_deletion_until_release() {
    let ctx = TestContext::new();
    let log = disk_log(&ctx, "compact", 2);
    let mut writer = log.writer().unwrap();
    for i in 1..=6 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }
    writer.commit(6).unwrap();

    let first = log.first_segment().unwrap();
    let path = first.path().unwrap().to_path_buf();
    first.acquire();

    let mut reader = log.reader(1, ReadMode::All);
    assert_eq!(log.compact(5), 2);
    assert_eq!(log.first_index(), 5);
    assert_eq!(reader.next_index(), 5);
    assert_eq!(reader.next().unwrap().index(), 5);

    // Still referenced
    assert!(first.is_deleted());
    assert!(path.exists());

    first.release();
    assert!(!path.exists());
}

#[test]
fn test_compaction_never_passes_commit_index() {
    let log = memory_log("bounded", 2);
    let mut writer = log.writer().unwrap();
    for i in 1..=6 {
        writer.append(Entry::new(1, payload(i))).unwrap();
    }
    writer.commit(2).unwrap();

    assert_eq!(log.compact(6), 1);
    assert_eq!(log.first_index(), 3);
    assert_eq!(log.last_index(), 6);
}

#[test]
fn test_reset_restarts_numbering() {
    let ctx = TestContext::new();
    {
        let log = disk_log(&ctx, "reset", 2);
        let mut writer = log.writer().unwrap();
        for i in 1..=5 {
            writer.append(Entry::new(1, payload(i))).unwrap();
        }
        writer.reset(50).unwrap();
        writer.append(Entry::new(3, payload(50))).unwrap();
        writer.close().unwrap();
    }

    let log = disk_log(&ctx, "reset", 2);
    assert_eq!(log.segment_count(), 1);
    assert_eq!(log.first_index(), 50);
    assert_eq!(log.last_index(), 50);
    assert_eq!(log.get(50).unwrap().term(), 3);
}
