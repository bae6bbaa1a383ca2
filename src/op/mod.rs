//! Edit log operation records
//!
//! An operation is the unit a stream delivers: a transaction id, an opcode,
//! an opaque payload and a CRC32 checksum over the encoded record. Decoding
//! fails on checksum mismatch, truncation or an unknown opcode.

mod checksum;
mod errors;
mod record;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{DecodeError, DecodeResult};
pub use record::{
    EditLogOp, OpCode, RecordPrefix, DEFAULT_MAX_RECORD_SIZE, LENGTH_PREFIX_SIZE, MIN_RECORD_SIZE,
    RECORD_PREFIX_SIZE,
};
