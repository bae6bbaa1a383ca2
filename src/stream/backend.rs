//! Backend capability set for edit log streams
//!
//! A backend knows how to pull decoded operations off one physical medium.
//! Everything above that (the lookahead slot, resync, skip_until, ordering
//! checks, lifecycle) lives once in [`EditLogInputStream`] and is never
//! re-implemented per backend.
//!
//! [`EditLogInputStream`]: super::EditLogInputStream

use std::fmt;

use crate::observability::{Event, Logger};
use crate::op::EditLogOp;

use super::errors::StreamResult;

/// Kind of medium a stream reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalType {
    /// Segment file on local disk
    File,
    /// In-process buffer
    Memory,
    /// Merge of several replicas of the same range
    Redundant,
}

impl JournalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalType::File => "file",
            JournalType::Memory => "memory",
            JournalType::Redundant => "redundant",
        }
    }
}

impl fmt::Display for JournalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operations a physical edit log medium must provide.
///
/// Positions are backend-defined: byte offsets for files, record indexes for
/// memory buffers. Callers treat them as opaque cursors.
pub trait StreamBackend {
    /// Acquire resources and validate the segment header.
    fn open(&mut self) -> StreamResult<()>;

    /// Decode the next operation and advance the cursor.
    ///
    /// Returns `Ok(None)` at genuine end of data. Malformed data is an
    /// error, and the cursor stays on the record that failed.
    fn next_op(&mut self) -> StreamResult<Option<EditLogOp>>;

    /// Like `next_op`, but never fails.
    ///
    /// The provided policy treats any failure as end of stream: nothing read
    /// past the first bad record is trusted. Backends that can tell trailing
    /// garbage from a real end of data should override this with a scan for
    /// the next verifiable record.
    fn next_valid_op(&mut self) -> Option<EditLogOp> {
        match self.next_op() {
            Ok(op) => op,
            Err(e) => {
                let message = e.to_string();
                Logger::warn(
                    Event::CorruptionTruncated,
                    &[("stream", self.name()), ("error", &message)],
                );
                None
            }
        }
    }

    /// Layout version governing decode rules.
    fn version(&mut self) -> StreamResult<i32>;

    fn position(&self) -> StreamResult<u64>;

    fn set_position(&mut self, position: u64) -> StreamResult<()>;

    /// Size of the underlying segment, for diagnostics.
    fn length(&self) -> StreamResult<u64>;

    /// Reopen at `position`; transactions below `skipped_until_txid` have
    /// already been consumed by the caller.
    fn refresh(&mut self, position: u64, skipped_until_txid: u64) -> StreamResult<()>;

    fn name(&self) -> &str;

    fn journal_type(&self) -> JournalType;

    /// First transaction this backend can produce.
    fn first_txid(&self) -> u64;

    /// Last transaction this backend can produce; `None` while the segment
    /// is still being written.
    fn last_txid(&self) -> Option<u64>;

    /// Release resources. Called at most once by the owning stream.
    fn close(&mut self) -> StreamResult<()>;
}

impl<B: StreamBackend + ?Sized> StreamBackend for Box<B> {
    fn open(&mut self) -> StreamResult<()> {
        (**self).open()
    }

    fn next_op(&mut self) -> StreamResult<Option<EditLogOp>> {
        (**self).next_op()
    }

    fn next_valid_op(&mut self) -> Option<EditLogOp> {
        (**self).next_valid_op()
    }

    fn version(&mut self) -> StreamResult<i32> {
        (**self).version()
    }

    fn position(&self) -> StreamResult<u64> {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> StreamResult<()> {
        (**self).set_position(position)
    }

    fn length(&self) -> StreamResult<u64> {
        (**self).length()
    }

    fn refresh(&mut self, position: u64, skipped_until_txid: u64) -> StreamResult<()> {
        (**self).refresh(position, skipped_until_txid)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn journal_type(&self) -> JournalType {
        (**self).journal_type()
    }

    fn first_txid(&self) -> u64 {
        (**self).first_txid()
    }

    fn last_txid(&self) -> Option<u64> {
        (**self).last_txid()
    }

    fn close(&mut self) -> StreamResult<()> {
        (**self).close()
    }
}
