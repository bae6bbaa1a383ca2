//! Stream error types
//!
//! Error codes:
//! - EDITLOG_IO_FAILED (ERROR severity)
//! - EDITLOG_DECODE_FAILED (ERROR severity)
//! - EDITLOG_VERSION_UNKNOWN (ERROR severity)
//! - EDITLOG_STREAM_CLOSED (FATAL severity)
//! - EDITLOG_OUT_OF_ORDER (FATAL severity)
//! - EDITLOG_REPLICA_DIVERGENCE (FATAL severity)
//!
//! ERROR failures may be swallowed by `resync`, which trades them for a
//! truncated stream. FATAL failures are sequencing or integrity violations
//! and must never be retried.

use std::fmt;
use std::io;

use crate::op::DecodeError;

/// Severity levels for stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The read failed; the caller may resync or give up
    Error,
    /// Replay must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Stream error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCode {
    /// Medium unavailable or short read
    EditlogIoFailed,
    /// Record failed checksum, framing or opcode validation
    EditlogDecodeFailed,
    /// Segment header missing or layout version unsupported
    EditlogVersionUnknown,
    /// Operation attempted on a closed stream
    EditlogStreamClosed,
    /// Backend delivered a non-increasing transaction id
    EditlogOutOfOrder,
    /// Replicas disagree on the same transaction
    EditlogReplicaDivergence,
}

impl StreamErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            StreamErrorCode::EditlogIoFailed => "EDITLOG_IO_FAILED",
            StreamErrorCode::EditlogDecodeFailed => "EDITLOG_DECODE_FAILED",
            StreamErrorCode::EditlogVersionUnknown => "EDITLOG_VERSION_UNKNOWN",
            StreamErrorCode::EditlogStreamClosed => "EDITLOG_STREAM_CLOSED",
            StreamErrorCode::EditlogOutOfOrder => "EDITLOG_OUT_OF_ORDER",
            StreamErrorCode::EditlogReplicaDivergence => "EDITLOG_REPLICA_DIVERGENCE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StreamErrorCode::EditlogIoFailed
            | StreamErrorCode::EditlogDecodeFailed
            | StreamErrorCode::EditlogVersionUnknown => Severity::Error,
            StreamErrorCode::EditlogStreamClosed
            | StreamErrorCode::EditlogOutOfOrder
            | StreamErrorCode::EditlogReplicaDivergence => Severity::Fatal,
        }
    }
}

impl fmt::Display for StreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
enum Source {
    Io(io::Error),
    Decode(DecodeError),
}

/// Stream error with code, message and optional location details
#[derive(Debug)]
pub struct StreamError {
    code: StreamErrorCode,
    message: String,
    details: Option<String>,
    source: Option<Source>,
}

impl StreamError {
    fn new(code: StreamErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// I/O failure against the underlying medium
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(Source::Io(source)),
            ..Self::new(StreamErrorCode::EditlogIoFailed, message)
        }
    }

    /// Record at `offset` could not be decoded
    pub fn decode_at_offset(offset: u64, source: DecodeError) -> Self {
        Self {
            details: Some(format!("byte_offset: {}", offset)),
            message: source.to_string(),
            source: Some(Source::Decode(source)),
            code: StreamErrorCode::EditlogDecodeFailed,
        }
    }

    /// Generic decode failure without a byte location
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(StreamErrorCode::EditlogDecodeFailed, message)
    }

    pub fn version_unknown(message: impl Into<String>) -> Self {
        Self::new(StreamErrorCode::EditlogVersionUnknown, message)
    }

    pub fn stream_closed(name: &str) -> Self {
        Self {
            details: Some(format!("stream: {}", name)),
            ..Self::new(StreamErrorCode::EditlogStreamClosed, "Stream used after close")
        }
    }

    pub fn out_of_order(previous: u64, received: u64) -> Self {
        Self {
            details: Some(format!("previous_txid: {}, received_txid: {}", previous, received)),
            ..Self::new(
                StreamErrorCode::EditlogOutOfOrder,
                "Transaction ids must strictly increase",
            )
        }
    }

    pub fn replica_divergence(txid: u64, expected: u32, actual: u32, replica: &str) -> Self {
        Self {
            details: Some(format!(
                "txid: {}, expected_checksum: {:08x}, actual_checksum: {:08x}, replica: {}",
                txid, expected, actual, replica
            )),
            ..Self::new(
                StreamErrorCode::EditlogReplicaDivergence,
                "Replicas disagree on transaction contents",
            )
        }
    }

    pub fn code(&self) -> StreamErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether replay must stop
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            Some(Source::Io(ref e)) => Some(e),
            Some(Source::Decode(ref e)) => Some(e),
            None => None,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
