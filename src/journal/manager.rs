//! Directory-backed journal manager
//!
//! Owns one directory of segment files. It lists segments, opens input
//! streams over the ones covering a requested transaction, and seals the
//! in-progress segment once its writer is done.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::StreamConfig;
use crate::observability::{Event, Logger};
use crate::stream::{
    EditLogInputStream, FileBackend, InProgressFlag, JournalType, StreamError, StreamResult,
};

use super::segment::{finalized_name, in_progress_name, SegmentInfo};
use super::writer::SegmentWriter;
use super::JournalManager;

/// Journal manager over a local directory.
///
/// Create it with [`FileJournalManager::new`] and keep the returned `Arc`:
/// streams it hands out only hold a weak reference back to it.
pub struct FileJournalManager {
    dir: PathBuf,
    config: StreamConfig,
    /// In-progress flags of streams opened over unsealed segments, by first txid
    open_flags: Mutex<HashMap<u64, Vec<InProgressFlag>>>,
}

impl FileJournalManager {
    pub fn new(dir: impl Into<PathBuf>, config: StreamConfig) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            config,
            open_flags: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Every segment in the directory, ordered by first txid.
    ///
    /// Files that are not named like segments are ignored. A missing
    /// directory holds no segments.
    pub fn list_segments(&self) -> StreamResult<Vec<SegmentInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            StreamError::io(
                format!("Failed to read journal directory: {}", self.dir.display()),
                e,
            )
        })?;

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| StreamError::io("Failed to read journal directory entry", e))?;
            if let Some(segment) = SegmentInfo::from_path(&entry.path()) {
                segments.push(segment);
            }
        }
        segments.sort_by_key(|s| (s.first_txid, s.is_in_progress()));

        Logger::trace(
            Event::SegmentsDiscovered,
            &[
                ("dir", &self.dir.display().to_string()),
                ("count", &segments.len().to_string()),
            ],
        );
        Ok(segments)
    }

    /// Opens streams over the segments that may hold `from_txid` or later,
    /// in transaction order.
    ///
    /// The in-progress segment is included only when `in_progress_ok`.
    /// Every stream is associated with this manager.
    pub fn select_input_streams(
        self: &Arc<Self>,
        from_txid: u64,
        in_progress_ok: bool,
    ) -> StreamResult<Vec<EditLogInputStream<FileBackend>>> {
        let jm: Arc<dyn JournalManager> = self.clone();
        let mut streams = Vec::new();

        for segment in self.list_segments()? {
            if !segment.reaches(from_txid) {
                continue;
            }
            if segment.is_in_progress() && !in_progress_ok {
                continue;
            }

            let backend = FileBackend::new(
                &segment.path,
                segment.first_txid,
                segment.last_txid,
                &self.config,
            );
            let stream = EditLogInputStream::new(backend).with_journal_manager(&jm);

            if segment.is_in_progress() {
                self.track_in_progress(segment.first_txid, stream.in_progress_flag());
            }
            streams.push(stream);
        }
        Ok(streams)
    }

    /// Clears `flag` when the segment starting at `first_txid` is finalized.
    ///
    /// Streams opened here are tracked already; this is for streams built
    /// on top of them, such as a merge of several copies.
    pub fn track_in_progress(&self, first_txid: u64, flag: InProgressFlag) {
        self.open_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(first_txid)
            .or_default()
            .push(flag);
    }

    /// Creates the in-progress segment starting at `first_txid`.
    pub fn start_segment(&self, first_txid: u64) -> StreamResult<SegmentWriter> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            StreamError::io(
                format!("Failed to create journal directory: {}", self.dir.display()),
                e,
            )
        })?;
        SegmentWriter::create(&self.dir.join(in_progress_name(first_txid)), first_txid)
    }

    /// Seals the in-progress segment starting at `first_txid` as ending at
    /// `last_txid`.
    ///
    /// Streams already reading the segment keep their open file and stop
    /// reporting themselves as in progress.
    pub fn finalize_segment(&self, first_txid: u64, last_txid: u64) -> StreamResult<PathBuf> {
        if last_txid < first_txid {
            return Err(StreamError::io(
                format!("Cannot finalize segment {} at txid {}", first_txid, last_txid),
                io::Error::new(io::ErrorKind::InvalidInput, "last txid before first txid"),
            ));
        }

        let from = self.dir.join(in_progress_name(first_txid));
        let to = self.dir.join(finalized_name(first_txid, last_txid));
        fs::rename(&from, &to).map_err(|e| {
            StreamError::io(format!("Failed to finalize segment: {}", from.display()), e)
        })?;

        let flags = self
            .open_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&first_txid)
            .unwrap_or_default();
        for flag in &flags {
            flag.set(false);
        }

        Logger::info(
            Event::SegmentFinalized,
            &[
                ("segment", &to.display().to_string()),
                ("first_txid", &first_txid.to_string()),
                ("last_txid", &last_txid.to_string()),
                ("open_readers", &flags.len().to_string()),
            ],
        );
        Ok(to)
    }
}

impl JournalManager for FileJournalManager {
    fn journal_type(&self) -> JournalType {
        JournalType::File
    }

    fn describe(&self) -> String {
        format!("file journal at {}", self.dir.display())
    }
}

impl fmt::Debug for FileJournalManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileJournalManager")
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{EditLogOp, OpCode};
    use tempfile::TempDir;

    fn write_segment(jm: &FileJournalManager, first: u64, last: u64, finalize: bool) {
        let mut writer = jm.start_segment(first).unwrap();
        for txid in first..=last {
            writer
                .append(&EditLogOp::new(OpCode::Add, txid, b"/f".to_vec()))
                .unwrap();
        }
        if finalize {
            jm.finalize_segment(first, last).unwrap();
        }
    }

    #[test]
    fn test_list_segments_in_txid_order() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 6, 8, true);
        write_segment(&jm, 1, 5, true);
        write_segment(&jm, 9, 9, false);
        fs::write(dir.path().join("VERSION"), b"1").unwrap();

        let segments = jm.list_segments().unwrap();
        let ranges: Vec<_> = segments.iter().map(|s| (s.first_txid, s.last_txid)).collect();
        assert_eq!(ranges, vec![(1, Some(5)), (6, Some(8)), (9, None)]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path().join("absent"), StreamConfig::default());
        assert!(jm.list_segments().unwrap().is_empty());
    }

    #[test]
    fn test_select_skips_segments_below_txid() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 1, 5, true);
        write_segment(&jm, 6, 8, true);

        let streams = jm.select_input_streams(6, false).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].first_txid(), 6);
        assert_eq!(streams[0].last_txid(), Some(8));
    }

    #[test]
    fn test_select_in_progress_only_when_asked() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 1, 3, true);
        write_segment(&jm, 4, 5, false);

        assert_eq!(jm.select_input_streams(1, false).unwrap().len(), 1);

        let streams = jm.select_input_streams(1, true).unwrap();
        assert_eq!(streams.len(), 2);
        assert!(!streams[0].is_in_progress());
        assert!(streams[1].is_in_progress());
    }

    #[test]
    fn test_streams_point_back_to_manager() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 1, 2, true);

        let streams = jm.select_input_streams(1, false).unwrap();
        let owner = streams[0].journal_manager().unwrap();
        assert_eq!(owner.journal_type(), JournalType::File);

        drop(owner);
        drop(jm);
        assert!(streams[0].journal_manager().is_none());
    }

    #[test]
    fn test_finalize_clears_in_progress_readers() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 1, 3, false);

        let mut streams = jm.select_input_streams(1, true).unwrap();
        let stream = &mut streams[0];
        assert!(stream.is_in_progress());
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);

        let sealed = jm.finalize_segment(1, 3).unwrap();
        assert!(sealed.ends_with(finalized_name(1, 3)));
        assert!(!stream.is_in_progress());

        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 2);
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 3);
        assert!(stream.read_op().unwrap().is_none());
    }

    #[test]
    fn test_finalize_clears_tracked_flags() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        write_segment(&jm, 1, 2, false);

        let tracked = InProgressFlag::new(true);
        let other = InProgressFlag::new(true);
        jm.track_in_progress(1, tracked.clone());
        jm.track_in_progress(7, other.clone());

        jm.finalize_segment(1, 2).unwrap();
        assert!(!tracked.get());
        assert!(other.get());
    }

    #[test]
    fn test_finalize_without_segment_fails() {
        let dir = TempDir::new().unwrap();
        let jm = FileJournalManager::new(dir.path(), StreamConfig::default());
        let err = jm.finalize_segment(1, 2).unwrap_err();
        assert!(!err.is_fatal());
    }
}
