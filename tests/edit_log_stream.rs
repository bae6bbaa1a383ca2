//! Edit Log Input Stream Contract Tests
//!
//! Tests the reading contract over real segment files:
//! - Ordered delivery, then end of stream on every later read
//! - resync is idempotent and never moves a stream holding a cached op
//! - skip_until discards exactly the operations below its target
//! - read_checksum reports the checksum written with the operation
//! - Closed streams refuse reads with a fatal error
//! - Growing in-progress segments are picked up by refresh
//! - Segments finalized under an open or unopened stream are still read

use editlog::config::StreamConfig;
use editlog::journal::{finalized_name, FileJournalManager, SegmentWriter};
use editlog::op::{EditLogOp, OpCode};
use editlog::stream::{EditLogInputStream, FileBackend, JournalType, HEADER_SIZE, LAYOUT_VERSION};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn create_temp_journal_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

fn create_op(txid: u64) -> EditLogOp {
    EditLogOp::new(
        OpCode::Mkdir,
        txid,
        format!("/user/hdfs/dir{}", txid).into_bytes(),
    )
}

fn write_segment(dir: &Path, name: &str, txids: &[u64]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = SegmentWriter::create(&path, txids.first().copied().unwrap_or(1))
        .expect("Failed to create segment");
    for &txid in txids {
        writer.append(&create_op(txid)).expect("Failed to append");
    }
    path
}

fn open_stream(path: &Path, first: u64, last: Option<u64>) -> EditLogInputStream<FileBackend> {
    EditLogInputStream::new(FileBackend::new(path, first, last, &StreamConfig::default()))
}

// =============================================================================
// Ordered Delivery
// =============================================================================

#[test]
fn test_ops_delivered_in_order_then_end_is_sticky() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1, 2, 3, 4]);
    let mut stream = open_stream(&path, 1, Some(4));

    let mut previous = 0;
    while let Some(op) = stream.read_op().unwrap() {
        assert!(op.txid() > previous, "txid {} after {}", op.txid(), previous);
        previous = op.txid();
    }
    assert_eq!(previous, 4);

    for _ in 0..3 {
        assert!(stream.read_op().unwrap().is_none());
    }
}

#[test]
fn test_stream_metadata() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1, 2]);
    let mut stream = open_stream(&path, 1, Some(2));

    assert_eq!(stream.name(), "seg");
    assert_eq!(stream.journal_type(), JournalType::File);
    assert_eq!(stream.first_txid(), 1);
    assert_eq!(stream.last_txid(), Some(2));
    assert!(!stream.is_in_progress());
    assert_eq!(stream.version().unwrap(), LAYOUT_VERSION);

    let expected_len = HEADER_SIZE + (create_op(1).encoded_len() + create_op(2).encoded_len()) as u64;
    assert_eq!(stream.length().unwrap(), expected_len);
}

#[test]
fn test_empty_segment() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[]);
    let mut stream = open_stream(&path, 1, None);

    assert!(stream.read_op().unwrap().is_none());
    stream.resync().unwrap();
    assert!(stream.read_op().unwrap().is_none());
    assert!(!stream.skip_until(0).unwrap());
    assert!(!stream.skip_until(u64::MAX).unwrap());
}

// =============================================================================
// resync
// =============================================================================

#[test]
fn test_resync_twice_is_same_as_once() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1, 2, 3]);

    let mut once = open_stream(&path, 1, Some(3));
    once.resync().unwrap();
    let once_ops: Vec<u64> = once.ops().map(|op| op.unwrap().txid()).collect();

    let mut twice = open_stream(&path, 1, Some(3));
    twice.resync().unwrap();
    twice.resync().unwrap();
    let twice_ops: Vec<u64> = twice.ops().map(|op| op.unwrap().txid()).collect();

    assert_eq!(once_ops, vec![1, 2, 3]);
    assert_eq!(once_ops, twice_ops);
}

#[test]
fn test_resync_with_cached_op_keeps_position() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1, 2, 3]);
    let mut stream = open_stream(&path, 1, Some(3));

    assert!(stream.skip_until(2).unwrap());
    let position = stream.position().unwrap();

    stream.resync().unwrap();
    assert_eq!(stream.position().unwrap(), position);
    assert_eq!(stream.read_op().unwrap().unwrap().txid(), 2);
}

// =============================================================================
// skip_until
// =============================================================================

#[test]
fn test_skip_until_over_sparse_ids() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[5, 6, 7, 9, 10]);
    let mut stream = open_stream(&path, 5, Some(10));

    assert!(stream.skip_until(8).unwrap());
    assert_eq!(stream.read_op().unwrap().unwrap().txid(), 9);

    assert!(!stream.skip_until(11).unwrap());
    assert!(stream.read_op().unwrap().is_none());
}

#[test]
fn test_skip_until_then_ops_resume_in_order() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &(1..=10).collect::<Vec<_>>());
    let mut stream = open_stream(&path, 1, Some(10));

    assert!(stream.skip_until(7).unwrap());
    let rest: Vec<u64> = stream.ops().map(|op| op.unwrap().txid()).collect();
    assert_eq!(rest, vec![7, 8, 9, 10]);
}

// =============================================================================
// Checksums
// =============================================================================

#[test]
fn test_read_checksum_matches_encoded_op() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1, 2, 3]);
    let mut stream = open_stream(&path, 1, Some(3));

    assert_eq!(stream.read_checksum(), None);
    while let Some(op) = stream.read_op().unwrap() {
        assert_eq!(stream.read_checksum(), Some(create_op(op.txid()).checksum()));
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_closed_stream_is_fatal() {
    let temp_dir = create_temp_journal_dir();
    let path = write_segment(temp_dir.path(), "seg", &[1]);
    let mut stream = open_stream(&path, 1, Some(1));

    stream.read_op().unwrap();
    stream.close().unwrap();

    let err = stream.read_op().unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().starts_with("[FATAL] EDITLOG_STREAM_CLOSED"));
}

#[test]
fn test_missing_segment_fails_on_first_read() {
    let temp_dir = create_temp_journal_dir();
    let mut stream = open_stream(&temp_dir.path().join("absent"), 1, Some(1));

    let err = stream.read_op().unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(err.code().code(), "EDITLOG_IO_FAILED");
}

#[test]
fn test_bad_magic_is_unknown_version() {
    let temp_dir = create_temp_journal_dir();
    let path = temp_dir.path().join("seg");
    std::fs::write(&path, b"NOTALOG!").unwrap();
    let mut stream = open_stream(&path, 1, Some(1));

    let err = stream.version().unwrap_err();
    assert_eq!(err.code().code(), "EDITLOG_VERSION_UNKNOWN");
}

// =============================================================================
// In-progress Segments
// =============================================================================

#[test]
fn test_refresh_picks_up_appended_ops() {
    let temp_dir = create_temp_journal_dir();
    let jm = FileJournalManager::new(temp_dir.path(), StreamConfig::default());
    let mut writer = jm.start_segment(1).unwrap();
    writer.append(&create_op(1)).unwrap();
    writer.append(&create_op(2)).unwrap();

    let mut streams = jm.select_input_streams(1, true).unwrap();
    let stream = &mut streams[0];
    assert!(stream.is_in_progress());

    assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);
    assert_eq!(stream.read_op().unwrap().unwrap().txid(), 2);
    assert!(stream.read_op().unwrap().is_none());
    let position = stream.position().unwrap();

    writer.append(&create_op(3)).unwrap();
    stream.refresh(position, 3).unwrap();

    assert_eq!(stream.read_op().unwrap().unwrap().txid(), 3);
    assert!(stream.read_op().unwrap().is_none());

    jm.finalize_segment(1, 3).unwrap();
    assert!(!stream.is_in_progress());
    assert_eq!(stream.last_txid(), None);

    let position = stream.position().unwrap();
    stream.refresh(position, 4).unwrap();
    assert_eq!(stream.last_txid(), Some(3));
    assert!(stream.read_op().unwrap().is_none());
}

#[test]
fn test_segment_finalized_before_first_read() {
    let temp_dir = create_temp_journal_dir();
    let jm = FileJournalManager::new(temp_dir.path(), StreamConfig::default());
    let mut writer = jm.start_segment(1).unwrap();
    writer.append(&create_op(1)).unwrap();
    writer.append(&create_op(2)).unwrap();

    let mut streams = jm.select_input_streams(1, true).unwrap();
    assert!(streams[0].is_in_progress());
    assert_eq!(streams[0].last_txid(), None);

    drop(writer);
    jm.finalize_segment(1, 2).unwrap();
    assert!(!streams[0].is_in_progress());

    let txids: Vec<u64> = streams[0].ops().map(|op| op.unwrap().txid()).collect();
    assert_eq!(txids, vec![1, 2]);
    assert_eq!(streams[0].last_txid(), Some(2));
    assert_eq!(streams[0].name(), finalized_name(1, 2));
}
