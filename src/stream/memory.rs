//! In-memory edit log backend
//!
//! Holds already-decoded operations. Used for tests, for tailing a buffer
//! handed over by another component, and as a replica in redundant streams.
//! A poisoned record can be injected to simulate corruption.

use std::io;

use crate::op::EditLogOp;

use super::backend::{JournalType, StreamBackend};
use super::errors::{StreamError, StreamResult};
use super::file::LAYOUT_VERSION;

/// Backend over a vector of operations. Positions are record indexes.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    name: String,
    ops: Vec<EditLogOp>,
    index: usize,
    failure_at: Option<usize>,
    first_txid: u64,
    last_txid: Option<u64>,
}

impl MemoryBackend {
    /// Finalized buffer covering exactly the given operations.
    pub fn new(name: impl Into<String>, ops: Vec<EditLogOp>) -> Self {
        let first_txid = ops.first().map_or(0, EditLogOp::txid);
        let last_txid = ops.last().map(EditLogOp::txid);
        Self {
            name: name.into(),
            ops,
            index: 0,
            failure_at: None,
            first_txid,
            last_txid,
        }
    }

    /// Marks the buffer as still being appended to.
    pub fn in_progress(mut self) -> Self {
        self.last_txid = None;
        self
    }

    /// Reading the record at `index` fails until the cursor is moved past it.
    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.failure_at = Some(index);
        self
    }

    /// Appends an operation, as a writer tailing into this buffer would.
    pub fn push(&mut self, op: EditLogOp) {
        if self.ops.is_empty() {
            self.first_txid = op.txid();
        }
        if self.last_txid.is_some() {
            self.last_txid = Some(op.txid());
        }
        self.ops.push(op);
    }
}

impl StreamBackend for MemoryBackend {
    fn open(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn next_op(&mut self) -> StreamResult<Option<EditLogOp>> {
        if self.failure_at == Some(self.index) {
            return Err(StreamError::decode(format!(
                "Poisoned record at index {} in {}",
                self.index, self.name
            )));
        }
        match self.ops.get(self.index) {
            Some(op) => {
                self.index += 1;
                Ok(Some(op.clone()))
            }
            None => Ok(None),
        }
    }

    fn version(&mut self) -> StreamResult<i32> {
        Ok(LAYOUT_VERSION)
    }

    fn position(&self) -> StreamResult<u64> {
        Ok(self.index as u64)
    }

    fn set_position(&mut self, position: u64) -> StreamResult<()> {
        if position > self.ops.len() as u64 {
            return Err(StreamError::io(
                format!("Position {} beyond end of {}", position, self.name),
                io::Error::new(io::ErrorKind::InvalidInput, "position out of range"),
            ));
        }
        self.index = position as usize;
        Ok(())
    }

    fn length(&self) -> StreamResult<u64> {
        Ok(self.ops.len() as u64)
    }

    fn refresh(&mut self, position: u64, _skipped_until_txid: u64) -> StreamResult<()> {
        self.set_position(position)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn journal_type(&self) -> JournalType {
        JournalType::Memory
    }

    fn first_txid(&self) -> u64 {
        self.first_txid
    }

    fn last_txid(&self) -> Option<u64> {
        self.last_txid
    }

    fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }
}
