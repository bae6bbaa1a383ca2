//! Edit log replay
//!
//! Drives input streams the way a metadata service does on startup: every
//! operation from a starting transaction onwards is handed to an applier,
//! exactly once and in transaction order.
//!
//! Two recovery modes:
//! - `Strict`: any read failure or missing transaction stops replay.
//! - `Resync`: non-fatal read failures are skipped with `resync`, and gaps
//!   are logged and counted. Fatal stream errors still stop replay.
//!
//! Replay never closes the streams it reads; they belong to the caller.

mod errors;

pub use errors::{ReplayError, ReplayErrorCode, ReplayResult, Severity};

use crate::config::{RecoveryMode, StreamConfig};
use crate::observability::{Event, Logger};
use crate::op::EditLogOp;
use crate::stream::{EditLogInputStream, StreamBackend, StreamError};

/// Applies replayed operations to in-memory metadata.
pub trait OpApply {
    fn apply_op(&mut self, op: &EditLogOp) -> ReplayResult<()>;
}

/// Statistics from a replay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Operations handed to the applier
    pub ops_applied: u64,
    /// Streams that were opened and read
    pub streams_read: u64,
    /// Read failures recovered with `resync`
    pub resyncs: u64,
    /// Places where transaction ids jumped forward
    pub gaps: u64,
    /// Transactions missing across all gaps
    pub txids_missing: u64,
    /// Highest transaction applied
    pub last_txid: Option<u64>,
}

/// Replays edit log streams into an [`OpApply`].
#[derive(Debug, Clone, Copy)]
pub struct EditLogReplayer {
    mode: RecoveryMode,
}

impl EditLogReplayer {
    pub fn new(mode: RecoveryMode) -> Self {
        Self { mode }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.recovery_mode)
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    /// Replay `streams`, in order, starting at `from_txid`.
    ///
    /// Streams are expected in transaction order, as journal managers list
    /// them. Streams ending before `from_txid` are not opened. Operations
    /// below the next expected transaction are discarded, so overlapping
    /// streams are fine.
    pub fn replay<B: StreamBackend, A: OpApply>(
        &self,
        streams: &mut [EditLogInputStream<B>],
        from_txid: u64,
        applier: &mut A,
    ) -> ReplayResult<ReplayStats> {
        let mode = match self.mode {
            RecoveryMode::Strict => "strict",
            RecoveryMode::Resync => "resync",
        };
        Logger::info(
            Event::ReplayBegin,
            &[
                ("from_txid", &from_txid.to_string()),
                ("mode", mode),
                ("streams", &streams.len().to_string()),
            ],
        );

        let mut stats = ReplayStats::default();
        let mut expected = from_txid;

        for stream in streams.iter_mut() {
            if stream.last_txid().map_or(false, |last| last < expected) {
                continue;
            }
            if let Err(e) = self.replay_stream(stream, &mut expected, applier, &mut stats) {
                Logger::fatal(
                    Event::ReplayFailed,
                    &[
                        ("code", e.code().code()),
                        ("error", &e.to_string()),
                        ("stream", stream.name()),
                        ("txid", &e.txid().map_or_else(String::new, |t| t.to_string())),
                    ],
                );
                return Err(e);
            }
        }

        Logger::info(
            Event::ReplayComplete,
            &[
                ("gaps", &stats.gaps.to_string()),
                (
                    "last_txid",
                    &stats.last_txid.map_or_else(String::new, |t| t.to_string()),
                ),
                ("ops_applied", &stats.ops_applied.to_string()),
                ("resyncs", &stats.resyncs.to_string()),
                ("streams_read", &stats.streams_read.to_string()),
            ],
        );
        Ok(stats)
    }

    fn replay_stream<B: StreamBackend, A: OpApply>(
        &self,
        stream: &mut EditLogInputStream<B>,
        expected: &mut u64,
        applier: &mut A,
        stats: &mut ReplayStats,
    ) -> ReplayResult<()> {
        stats.streams_read += 1;

        loop {
            match stream.skip_until(*expected) {
                Ok(_) => break,
                Err(e) => self.recover(stream, *expected, e, stats)?,
            }
        }

        loop {
            let op = match stream.read_op() {
                Ok(Some(op)) => op,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.recover(stream, *expected, e, stats)?;
                    continue;
                }
            };

            if op.txid() < *expected {
                // Resync can land below the target; those were applied already.
                continue;
            }
            if op.txid() > *expected {
                self.on_gap(stream.name(), *expected, op.txid(), stats)?;
            }

            applier.apply_op(&op)?;
            stats.ops_applied += 1;
            stats.last_txid = Some(op.txid());
            *expected = op.txid() + 1;
        }
    }

    /// Strict mode and fatal errors stop replay; otherwise resync the stream.
    fn recover<B: StreamBackend>(
        &self,
        stream: &mut EditLogInputStream<B>,
        expected: u64,
        error: StreamError,
        stats: &mut ReplayStats,
    ) -> ReplayResult<()> {
        if self.mode == RecoveryMode::Strict || error.is_fatal() {
            return Err(ReplayError::stream_failed(stream.name(), expected, error));
        }
        stats.resyncs += 1;
        stream
            .resync()
            .map_err(|e| ReplayError::stream_failed(stream.name(), expected, e))
    }

    fn on_gap(
        &self,
        stream: &str,
        expected: u64,
        found: u64,
        stats: &mut ReplayStats,
    ) -> ReplayResult<()> {
        if self.mode == RecoveryMode::Strict {
            return Err(ReplayError::gap(expected, found));
        }
        stats.gaps += 1;
        stats.txids_missing += found - expected;
        Logger::warn(
            Event::ReplayGap,
            &[
                ("expected_txid", &expected.to_string()),
                ("found_txid", &found.to_string()),
                ("stream", stream),
            ],
        );
        Ok(())
    }
}
