//! Reading from several journal directories at once
//!
//! Each directory is a full copy of the log. Segments starting at the same
//! transaction are merged into one redundant stream so that a damaged copy
//! is read around instead of stopping replay. A merged stream over
//! in-progress copies stops being in progress as soon as any contributing
//! manager finalizes its copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StreamConfig;
use crate::observability::{Event, Logger};
use crate::stream::{
    DynEditLogInputStream, EditLogInputStream, RedundantBackend, StreamError, StreamResult,
};

use super::manager::FileJournalManager;
use super::JournalManager;

/// Set of journal managers holding copies of the same log.
#[derive(Debug)]
pub struct JournalSet {
    managers: Vec<Arc<FileJournalManager>>,
    config: StreamConfig,
}

impl JournalSet {
    pub fn new(managers: Vec<Arc<FileJournalManager>>, config: StreamConfig) -> Self {
        Self { managers, config }
    }

    pub fn managers(&self) -> &[Arc<FileJournalManager>] {
        &self.managers
    }

    /// One stream per segment start, in transaction order.
    ///
    /// A directory that cannot be listed is logged and left out. The call
    /// fails only when no directory could be listed at all.
    pub fn select_input_streams(
        &self,
        from_txid: u64,
        in_progress_ok: bool,
    ) -> StreamResult<Vec<DynEditLogInputStream>> {
        let mut by_first_txid: BTreeMap<u64, Vec<(&Arc<FileJournalManager>, DynEditLogInputStream)>> =
            BTreeMap::new();
        let mut last_error: Option<StreamError> = None;
        let mut listed = 0usize;

        for jm in &self.managers {
            match jm.select_input_streams(from_txid, in_progress_ok) {
                Ok(streams) => {
                    listed += 1;
                    for stream in streams {
                        by_first_txid
                            .entry(stream.first_txid())
                            .or_default()
                            .push((jm, stream.into_dyn()));
                    }
                }
                Err(e) => {
                    Logger::warn(
                        Event::JournalSkipped,
                        &[("journal", &jm.describe()), ("error", &e.to_string())],
                    );
                    last_error = Some(e);
                }
            }
        }

        if listed == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let mut merged = Vec::with_capacity(by_first_txid.len());
        for (first_txid, mut copies) in by_first_txid {
            if copies.len() == 1 {
                merged.extend(copies.pop().map(|(_, stream)| stream));
                continue;
            }

            let tracking: Vec<&Arc<FileJournalManager>> = copies
                .iter()
                .filter(|(_, stream)| stream.is_in_progress())
                .map(|(jm, _)| *jm)
                .collect();
            let streams = copies.into_iter().map(|(_, stream)| stream).collect();
            let stream = EditLogInputStream::new(RedundantBackend::new(streams, &self.config)?);
            if stream.is_in_progress() {
                for jm in tracking {
                    jm.track_in_progress(first_txid, stream.in_progress_flag());
                }
            }
            merged.push(stream.into_dyn());
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{EditLogOp, OpCode};
    use crate::stream::JournalType;
    use tempfile::TempDir;

    fn write_finalized(jm: &FileJournalManager, first: u64, last: u64) {
        let mut writer = jm.start_segment(first).unwrap();
        for txid in first..=last {
            writer
                .append(&EditLogOp::new(OpCode::SetOwner, txid, b"/f:hdfs".to_vec()))
                .unwrap();
        }
        jm.finalize_segment(first, last).unwrap();
    }

    #[test]
    fn test_copies_are_merged() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let jm_a = FileJournalManager::new(a.path(), StreamConfig::default());
        let jm_b = FileJournalManager::new(b.path(), StreamConfig::default());
        write_finalized(&jm_a, 1, 3);
        write_finalized(&jm_b, 1, 3);
        write_finalized(&jm_a, 4, 4);

        let set = JournalSet::new(vec![jm_a, jm_b], StreamConfig::default());
        let mut streams = set.select_input_streams(1, false).unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].journal_type(), JournalType::Redundant);
        assert_eq!(streams[1].journal_type(), JournalType::File);

        let txids: Vec<u64> = streams
            .iter_mut()
            .flat_map(|s| s.ops().map(|op| op.unwrap().txid()).collect::<Vec<_>>())
            .collect();
        assert_eq!(txids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unreadable_directory_is_skipped() {
        let a = TempDir::new().unwrap();
        let jm_a = FileJournalManager::new(a.path(), StreamConfig::default());
        write_finalized(&jm_a, 1, 2);

        // A regular file where a directory is expected cannot be listed.
        let not_a_dir = a.path().join("not_a_dir");
        std::fs::write(&not_a_dir, b"x").unwrap();
        let jm_b = FileJournalManager::new(&not_a_dir, StreamConfig::default());

        let set = JournalSet::new(vec![jm_a, jm_b], StreamConfig::default());
        let streams = set.select_input_streams(1, false).unwrap();
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_all_directories_unreadable() {
        let a = TempDir::new().unwrap();
        let not_a_dir = a.path().join("not_a_dir");
        std::fs::write(&not_a_dir, b"x").unwrap();
        let jm = FileJournalManager::new(&not_a_dir, StreamConfig::default());

        let set = JournalSet::new(vec![jm], StreamConfig::default());
        assert!(set.select_input_streams(1, false).is_err());
    }
}
