//! Segment file naming
//!
//! - Finalized: `edits_<first>-<last>`
//! - In progress: `edits_inprogress_<first>`
//!
//! Transaction ids are zero-padded to 19 digits so that lexical order
//! matches numeric order in directory listings.

use std::path::{Path, PathBuf};

const FINALIZED_PREFIX: &str = "edits_";
const IN_PROGRESS_PREFIX: &str = "edits_inprogress_";
const TXID_WIDTH: usize = 19;

/// File name of a finalized segment.
pub fn finalized_name(first_txid: u64, last_txid: u64) -> String {
    format!(
        "{}{:0width$}-{:0width$}",
        FINALIZED_PREFIX,
        first_txid,
        last_txid,
        width = TXID_WIDTH
    )
}

/// File name of the segment currently being written.
pub fn in_progress_name(first_txid: u64) -> String {
    format!("{}{:0width$}", IN_PROGRESS_PREFIX, first_txid, width = TXID_WIDTH)
}

fn parse_txid(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses a segment file name into `(first_txid, last_txid)`.
///
/// `last_txid` is `None` for an in-progress segment. Anything else found
/// in a journal directory returns `None`.
pub fn parse_segment_name(name: &str) -> Option<(u64, Option<u64>)> {
    if let Some(rest) = name.strip_prefix(IN_PROGRESS_PREFIX) {
        return parse_txid(rest).map(|first| (first, None));
    }
    let rest = name.strip_prefix(FINALIZED_PREFIX)?;
    let (first, last) = rest.split_once('-')?;
    let first = parse_txid(first)?;
    let last = parse_txid(last)?;
    if last < first {
        return None;
    }
    Some((first, Some(last)))
}

/// A segment file discovered in a journal directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub first_txid: u64,
    /// `None` while the segment is in progress
    pub last_txid: Option<u64>,
}

impl SegmentInfo {
    /// Describes `path` if its file name is a segment name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (first_txid, last_txid) = parse_segment_name(name)?;
        Some(Self {
            path: path.to_path_buf(),
            first_txid,
            last_txid,
        })
    }

    pub fn is_in_progress(&self) -> bool {
        self.last_txid.is_none()
    }

    /// Whether the segment may hold `txid` or anything after it.
    pub fn reaches(&self, txid: u64) -> bool {
        self.last_txid.map_or(true, |last| last >= txid)
    }
}
