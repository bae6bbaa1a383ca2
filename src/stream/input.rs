//! The edit log input stream
//!
//! Wraps a [`StreamBackend`] and adds, once for every medium:
//! - a one-slot lookahead cache, filled by `resync` and `skip_until`
//! - strictly increasing transaction ids across `read_op` calls
//! - the Unopened -> Open -> Closed lifecycle
//! - the in-progress flag and the journal manager association
//!
//! The stream is single consumer. `read_op`, `resync` and `skip_until` take
//! `&mut self`; give each replay context its own stream rather than sharing
//! one behind a lock. Only the in-progress flag is shared, through
//! [`InProgressFlag`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::journal::JournalManager;
use crate::observability::{Event, Logger};
use crate::op::EditLogOp;

use super::backend::{JournalType, StreamBackend};
use super::errors::{StreamError, StreamResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Unopened,
    Open,
    Closed,
}

/// Shared handle to a stream's in-progress flag.
///
/// The journal manager keeps a clone and clears it when the segment is
/// finalized, possibly while a read is in flight on the owning thread.
#[derive(Debug, Clone)]
pub struct InProgressFlag(Arc<AtomicBool>);

impl InProgressFlag {
    pub fn new(in_progress: bool) -> Self {
        Self(Arc::new(AtomicBool::new(in_progress)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, in_progress: bool) {
        self.0.store(in_progress, Ordering::Release);
    }
}

/// Contents of the one-slot lookahead cache.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookahead {
    Empty,
    Op(EditLogOp),
    /// A resync scan already found nothing; the next read reports end of stream.
    End,
}

/// Stream over heterogeneous backends, used for redundant candidates.
pub type DynEditLogInputStream = EditLogInputStream<Box<dyn StreamBackend>>;

/// Validated, strictly ordered operations from one edit log medium.
pub struct EditLogInputStream<B: StreamBackend> {
    backend: B,
    state: StreamState,
    /// Delivered by the next `read_op` without touching the backend.
    lookahead: Lookahead,
    /// Highest txid pulled from the backend since the last repositioning.
    last_txid_read: Option<u64>,
    read_checksum: Option<u32>,
    journal_manager: Option<Weak<dyn JournalManager>>,
    in_progress: InProgressFlag,
}

impl<B: StreamBackend> EditLogInputStream<B> {
    /// Wraps `backend`. The stream counts as in progress while the backend
    /// has no upper transaction bound.
    pub fn new(backend: B) -> Self {
        let in_progress = backend.last_txid().is_none();
        Self {
            backend,
            state: StreamState::Unopened,
            lookahead: Lookahead::Empty,
            last_txid_read: None,
            read_checksum: None,
            journal_manager: None,
            in_progress: InProgressFlag::new(in_progress),
        }
    }

    /// Associates the stream with the manager that produced it.
    pub fn with_journal_manager(mut self, jm: &Arc<dyn JournalManager>) -> Self {
        self.set_journal_manager(jm);
        self
    }

    fn ensure_open(&mut self) -> StreamResult<()> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::Closed => Err(StreamError::stream_closed(self.backend.name())),
            StreamState::Unopened => {
                self.backend.open()?;
                self.state = StreamState::Open;
                Logger::info(
                    Event::StreamOpened,
                    &[
                        ("stream", self.backend.name()),
                        ("type", self.backend.journal_type().as_str()),
                    ],
                );
                Ok(())
            }
        }
    }

    fn check_order(&mut self, op: &EditLogOp) -> StreamResult<()> {
        if let Some(last) = self.last_txid_read {
            if op.txid() <= last {
                return Err(StreamError::out_of_order(last, op.txid()));
            }
        }
        self.last_txid_read = Some(op.txid());
        Ok(())
    }

    /// Next operation from the cache or the backend, without recording it
    /// as consumed.
    fn take_next(&mut self) -> StreamResult<Option<EditLogOp>> {
        match std::mem::replace(&mut self.lookahead, Lookahead::Empty) {
            Lookahead::Op(op) => return Ok(Some(op)),
            Lookahead::End => return Ok(None),
            Lookahead::Empty => {}
        }
        match self.backend.next_op()? {
            Some(op) => {
                self.check_order(&op)?;
                Ok(Some(op))
            }
            None => Ok(None),
        }
    }

    /// Read the next operation.
    ///
    /// Returns the cached operation if `resync` or `skip_until` left one,
    /// otherwise asks the backend. `Ok(None)` means end of stream. Backend
    /// failures are returned untouched.
    pub fn read_op(&mut self) -> StreamResult<Option<EditLogOp>> {
        self.ensure_open()?;
        let op = self.take_next()?;
        if let Some(ref op) = op {
            self.read_checksum = Some(op.checksum());
        }
        Ok(op)
    }

    /// Look at the next operation without consuming it.
    pub fn peek_op(&mut self) -> StreamResult<Option<&EditLogOp>> {
        self.ensure_open()?;
        if matches!(self.lookahead, Lookahead::Empty) {
            self.lookahead = match self.take_next()? {
                Some(op) => Lookahead::Op(op),
                None => Lookahead::End,
            };
        }
        match self.lookahead {
            Lookahead::Op(ref op) => Ok(Some(op)),
            _ => Ok(None),
        }
    }

    /// Position the stream so that `read_op` can deliver a valid operation.
    ///
    /// No-op while the lookahead slot is occupied. Otherwise performs exactly
    /// one `next_valid_op` call and caches whatever it finds. Finding
    /// nothing caches end of stream, so the next `read_op` returns `Ok(None)`
    /// instead of tripping over the same damaged bytes.
    pub fn resync(&mut self) -> StreamResult<()> {
        self.ensure_open()?;
        if !matches!(self.lookahead, Lookahead::Empty) {
            return Ok(());
        }
        self.lookahead = match self.backend.next_valid_op() {
            Some(op) => {
                self.check_order(&op)?;
                Lookahead::Op(op)
            }
            None => Lookahead::End,
        };
        Ok(())
    }

    /// Discard operations below `txid`.
    ///
    /// Afterwards the next `read_op` returns either end of stream or an
    /// operation with a txid of at least `txid`. Returns `true` if such an
    /// operation was found. Cost is linear in the number of skipped records.
    pub fn skip_until(&mut self, txid: u64) -> StreamResult<bool> {
        self.ensure_open()?;
        let mut skipped = 0u64;
        let found = loop {
            match self.take_next()? {
                None => {
                    self.lookahead = Lookahead::End;
                    break false;
                }
                Some(op) if op.txid() >= txid => {
                    self.lookahead = Lookahead::Op(op);
                    break true;
                }
                Some(op) => {
                    self.read_checksum = Some(op.checksum());
                    skipped += 1;
                }
            }
        };

        Logger::trace(
            Event::SkipComplete,
            &[
                ("stream", self.backend.name()),
                ("target_txid", &txid.to_string()),
                ("skipped", &skipped.to_string()),
                ("found", if found { "true" } else { "false" }),
            ],
        );
        Ok(found)
    }

    /// Backend-defined progress cursor.
    pub fn position(&self) -> StreamResult<u64> {
        self.backend.position()
    }

    /// Move the cursor. Drops any cached operation and forgets the ordering
    /// watermark, since the caller chose where reading resumes.
    pub fn set_position(&mut self, position: u64) -> StreamResult<()> {
        self.ensure_open()?;
        self.lookahead = Lookahead::Empty;
        self.last_txid_read = None;
        self.backend.set_position(position)
    }

    /// Rebind the stream in place to read from `position`, treating
    /// transactions below `skipped_until_txid` as already consumed.
    pub fn refresh(&mut self, position: u64, skipped_until_txid: u64) -> StreamResult<()> {
        self.ensure_open()?;
        self.lookahead = Lookahead::Empty;
        self.backend.refresh(position, skipped_until_txid)?;
        self.last_txid_read = skipped_until_txid.checked_sub(1);
        if self.backend.last_txid().is_some() {
            self.in_progress.set(false);
        }

        Logger::info(
            Event::StreamRefreshed,
            &[
                ("stream", self.backend.name()),
                ("position", &position.to_string()),
                ("skipped_until_txid", &skipped_until_txid.to_string()),
            ],
        );
        Ok(())
    }

    pub fn length(&self) -> StreamResult<u64> {
        self.backend.length()
    }

    /// Layout version of the operations in the stream.
    pub fn version(&mut self) -> StreamResult<i32> {
        self.ensure_open()?;
        self.backend.version()
    }

    /// Checksum of the operation most recently consumed, either returned by
    /// `read_op` or discarded by `skip_until`.
    pub fn read_checksum(&self) -> Option<u32> {
        self.read_checksum
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn journal_type(&self) -> JournalType {
        self.backend.journal_type()
    }

    pub fn first_txid(&self) -> u64 {
        self.backend.first_txid()
    }

    /// Last txid the stream can hold, `None` while unbounded.
    ///
    /// A stream over a segment finalized after it was created learns the
    /// bound when it is next opened or refreshed; `is_in_progress` may turn
    /// false before that.
    pub fn last_txid(&self) -> Option<u64> {
        self.backend.last_txid()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.get()
    }

    pub fn set_is_in_progress(&self, in_progress: bool) {
        self.in_progress.set(in_progress);
    }

    /// Handle for flipping the in-progress flag from another context.
    pub fn in_progress_flag(&self) -> InProgressFlag {
        self.in_progress.clone()
    }

    /// Non-owning association; the manager's lifetime is its owner's business.
    pub fn set_journal_manager(&mut self, jm: &Arc<dyn JournalManager>) {
        self.journal_manager = Some(Arc::downgrade(jm));
    }

    /// The producing journal manager, if still alive.
    pub fn journal_manager(&self) -> Option<Arc<dyn JournalManager>> {
        self.journal_manager.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Close the stream and release the backend. Closing twice is a no-op.
    pub fn close(&mut self) -> StreamResult<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        self.state = StreamState::Closed;
        self.lookahead = Lookahead::Empty;
        let result = self.backend.close();
        Logger::info(Event::StreamClosed, &[("stream", self.backend.name())]);
        result
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Iterate over the remaining operations.
    ///
    /// Stops at end of stream; a failure is yielded once, then iteration ends.
    pub fn ops(&mut self) -> Ops<'_, B> {
        Ops {
            stream: self,
            done: false,
        }
    }
}

impl<B: StreamBackend + 'static> EditLogInputStream<B> {
    /// Erase the backend type so streams over different media can be mixed.
    pub fn into_dyn(self) -> DynEditLogInputStream {
        EditLogInputStream {
            backend: Box::new(self.backend),
            state: self.state,
            lookahead: self.lookahead,
            last_txid_read: self.last_txid_read,
            read_checksum: self.read_checksum,
            journal_manager: self.journal_manager,
            in_progress: self.in_progress,
        }
    }
}

/// Iterator returned by [`EditLogInputStream::ops`]
pub struct Ops<'a, B: StreamBackend> {
    stream: &'a mut EditLogInputStream<B>,
    done: bool,
}

impl<B: StreamBackend> Iterator for Ops<'_, B> {
    type Item = StreamResult<EditLogOp>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.read_op() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
