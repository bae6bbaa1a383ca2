//! Record decode errors

use thiserror::Error;

/// Result type for record decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Reasons an encoded operation could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid record length: {0}")]
    InvalidLength(usize),

    #[error("Record length {length} exceeds limit {limit}")]
    TooLarge { length: usize, limit: usize },

    #[error("Checksum mismatch: computed {computed:08x}, stored {stored:08x}")]
    ChecksumMismatch { computed: u32, stored: u32 },

    #[error("Unknown opcode: {0}")]
    UnknownOpCode(u8),
}

impl DecodeError {
    /// Whether more bytes could turn this failure into a successful decode
    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::Truncated { .. })
    }
}
