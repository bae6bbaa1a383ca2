//! CRC32 checksums for edit log records
//!
//! Every encoded operation ends with a CRC32 (IEEE polynomial) computed over
//! all bytes that precede it: length prefix, opcode, transaction id and
//! payload. Any mismatch means the record is corrupt.

use super::errors::{DecodeError, DecodeResult};

/// CRC32 of a record body.
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Checks a record body against the checksum stored after it.
pub fn verify_checksum(data: &[u8], stored: u32) -> DecodeResult<()> {
    let computed = compute_checksum(data);
    if computed != stored {
        return Err(DecodeError::ChecksumMismatch { computed, stored });
    }
    Ok(())
}
