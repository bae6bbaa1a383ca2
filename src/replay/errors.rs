//! Replay error types
//!
//! Error codes:
//! - EDITLOG_REPLAY_FAILED (FATAL): the applier rejected an operation
//! - EDITLOG_REPLAY_STREAM_FAILED (FATAL): a stream could not be read
//! - EDITLOG_REPLAY_GAP (FATAL): transactions are missing
//!
//! Replay either reaches the end of the log or stops the process; there
//! is no partially replayed state a caller could continue from.

use std::fmt;

use crate::stream::StreamError;

/// Severity levels for replay errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Replay must not continue
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayErrorCode {
    EditlogReplayFailed,
    EditlogReplayStreamFailed,
    EditlogReplayGap,
}

impl ReplayErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ReplayErrorCode::EditlogReplayFailed => "EDITLOG_REPLAY_FAILED",
            ReplayErrorCode::EditlogReplayStreamFailed => "EDITLOG_REPLAY_STREAM_FAILED",
            ReplayErrorCode::EditlogReplayGap => "EDITLOG_REPLAY_GAP",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

impl fmt::Display for ReplayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Replay error with the transaction it stopped at
#[derive(Debug)]
pub struct ReplayError {
    code: ReplayErrorCode,
    message: String,
    /// Transaction being replayed when the error occurred
    txid: Option<u64>,
    source: Option<StreamError>,
}

impl ReplayError {
    /// The applier could not apply `txid`.
    pub fn apply_failed(txid: u64, reason: impl Into<String>) -> Self {
        Self {
            code: ReplayErrorCode::EditlogReplayFailed,
            message: format!("Failed to apply txid {}: {}", txid, reason.into()),
            txid: Some(txid),
            source: None,
        }
    }

    /// Reading the stream named `stream` failed while expecting `txid`.
    pub fn stream_failed(stream: &str, txid: u64, source: StreamError) -> Self {
        Self {
            code: ReplayErrorCode::EditlogReplayStreamFailed,
            message: format!("Failed to read {} at txid {}", stream, txid),
            txid: Some(txid),
            source: Some(source),
        }
    }

    /// Expected `expected` next but the log continued at `found`.
    pub fn gap(expected: u64, found: u64) -> Self {
        Self {
            code: ReplayErrorCode::EditlogReplayGap,
            message: format!(
                "Missing transactions {}..{} (expected {}, found {})",
                expected, found, expected, found
            ),
            txid: Some(expected),
            source: None,
        }
    }

    pub fn code(&self) -> ReplayErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn txid(&self) -> Option<u64> {
        self.txid
    }

    /// Underlying stream failure, if any
    pub fn stream_error(&self) -> Option<&StreamError> {
        self.source.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for replay
pub type ReplayResult<T> = Result<T, ReplayError>;
