//! Segment writer
//!
//! Produces segment files in the layout `FileBackend` reads. Every append
//! is written straight through and fsynced before it returns; callers that
//! need to build large segments quickly should batch ops themselves.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::op::EditLogOp;
use crate::stream::{encode_header, StreamError, StreamResult, LAYOUT_VERSION};

/// Append-only writer for one segment file.
pub struct SegmentWriter {
    path: PathBuf,
    file: File,
    first_txid: u64,
    last_txid: Option<u64>,
}

impl SegmentWriter {
    /// Creates a new segment at `path` and writes its header.
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path, first_txid: u64) -> StreamResult<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                StreamError::io(format!("Failed to create segment: {}", path.display()), e)
            })?;

        file.write_all(&encode_header(LAYOUT_VERSION))
            .and_then(|_| file.sync_all())
            .map_err(|e| StreamError::io("Failed to write segment header", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            first_txid,
            last_txid: None,
        })
    }

    /// Appends one operation.
    ///
    /// Transaction ids must start at the segment's first id and increase
    /// strictly, exactly as readers will check them.
    pub fn append(&mut self, op: &EditLogOp) -> StreamResult<()> {
        let expected_min = self.last_txid.map_or(self.first_txid, |last| last + 1);
        if op.txid() < expected_min {
            return Err(StreamError::out_of_order(
                expected_min.saturating_sub(1),
                op.txid(),
            ));
        }

        self.file
            .write_all(&op.encode())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| {
                StreamError::io(format!("Failed to append txid {}", op.txid()), e)
            })?;

        self.last_txid = Some(op.txid());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn first_txid(&self) -> u64 {
        self.first_txid
    }

    /// Highest txid written so far.
    pub fn last_txid(&self) -> Option<u64> {
        self.last_txid
    }
}
