//! Edit log operation records and their on-disk framing
//!
//! Each record is laid out little-endian as:
//! - Record Length (u32): total bytes, including this field and the checksum
//! - Opcode (u8)
//! - Transaction Id (u64)
//! - Payload (variable, opaque)
//! - Checksum (u32): CRC32 over every preceding byte of the record
//!
//! What a payload means for the namespace is up to the applier; the stream
//! layer only needs the transaction id and the checksum.

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{DecodeError, DecodeResult};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest well-formed record: length + opcode + txid + checksum
pub const MIN_RECORD_SIZE: usize = LENGTH_PREFIX_SIZE + 1 + 8 + 4;

/// Default upper bound on a single record (16 MiB)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

const OPCODE_OFFSET: usize = LENGTH_PREFIX_SIZE;
const TXID_OFFSET: usize = OPCODE_OFFSET + 1;
const PAYLOAD_OFFSET: usize = TXID_OFFSET + 8;

/// Bytes covering a record's length, opcode and txid
pub const RECORD_PREFIX_SIZE: usize = PAYLOAD_OFFSET;

/// Fixed-size front of an encoded record, unverified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrefix {
    pub length: usize,
    pub opcode: OpCode,
    pub txid: u64,
}

/// Namespace mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Opens a log segment
    StartLogSegment = 0,
    /// Seals a log segment
    EndLogSegment = 1,
    Mkdir = 2,
    /// Opens a file for write
    Add = 3,
    /// Closes a file opened by `Add`
    Close = 4,
    Delete = 5,
    Rename = 6,
    SetReplication = 7,
    SetPermissions = 8,
    SetOwner = 9,
    TimesUpdate = 10,
    /// Filler record with no namespace effect
    Noop = 11,
}

impl OpCode {
    /// Convert from u8, returns None for unknown values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OpCode::StartLogSegment),
            1 => Some(OpCode::EndLogSegment),
            2 => Some(OpCode::Mkdir),
            3 => Some(OpCode::Add),
            4 => Some(OpCode::Close),
            5 => Some(OpCode::Delete),
            6 => Some(OpCode::Rename),
            7 => Some(OpCode::SetReplication),
            8 => Some(OpCode::SetPermissions),
            9 => Some(OpCode::SetOwner),
            10 => Some(OpCode::TimesUpdate),
            11 => Some(OpCode::Noop),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for the segment boundary markers
    pub fn is_segment_marker(self) -> bool {
        matches!(self, OpCode::StartLogSegment | OpCode::EndLogSegment)
    }
}

/// A single decoded edit log operation.
///
/// Immutable once built. The checksum is computed when the operation is
/// constructed and carried through encode/decode unchanged, so a reader can
/// compare the checksum of the same transaction across independent copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditLogOp {
    opcode: OpCode,
    txid: u64,
    payload: Vec<u8>,
    checksum: u32,
}

impl EditLogOp {
    /// Create a new operation and compute its checksum
    pub fn new(opcode: OpCode, txid: u64, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let record_length = (MIN_RECORD_SIZE + payload.len()) as u32;
        let checksum = compute_checksum(&Self::header_and_payload(
            record_length,
            opcode,
            txid,
            &payload,
        ));
        Self {
            opcode,
            txid,
            payload,
            checksum,
        }
    }

    /// Returns the transaction id
    pub fn txid(&self) -> u64 {
        self.txid
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the CRC32 over the encoded record
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_SIZE + self.payload.len()
    }

    fn header_and_payload(record_length: u32, opcode: OpCode, txid: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(record_length as usize);
        buf.extend_from_slice(&record_length.to_le_bytes());
        buf.push(opcode.as_u8());
        buf.extend_from_slice(&txid.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Encode the complete record, checksum included
    pub fn encode(&self) -> Vec<u8> {
        let record_length = self.encoded_len() as u32;
        let mut buf = Self::header_and_payload(record_length, self.opcode, self.txid, &self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Reads the length prefix of a record without validating it.
    pub fn peek_length(data: &[u8]) -> DecodeResult<usize> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Err(DecodeError::Truncated {
                needed: LENGTH_PREFIX_SIZE,
                available: data.len(),
            });
        }
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize)
    }

    /// Reads the length, opcode and txid at the front of a record without
    /// looking at its payload or checksum.
    pub fn peek_prefix(data: &[u8]) -> DecodeResult<RecordPrefix> {
        if data.len() < RECORD_PREFIX_SIZE {
            return Err(DecodeError::Truncated {
                needed: RECORD_PREFIX_SIZE,
                available: data.len(),
            });
        }
        let length = Self::peek_length(data)?;

        let opcode_byte = data[OPCODE_OFFSET];
        let opcode = OpCode::from_u8(opcode_byte).ok_or(DecodeError::UnknownOpCode(opcode_byte))?;

        let mut txid_bytes = [0u8; 8];
        txid_bytes.copy_from_slice(&data[TXID_OFFSET..PAYLOAD_OFFSET]);

        Ok(RecordPrefix {
            length,
            opcode,
            txid: u64::from_le_bytes(txid_bytes),
        })
    }

    /// Decode a record from the front of `data` using the default size limit.
    ///
    /// Returns the operation and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> DecodeResult<(Self, usize)> {
        Self::decode_with_limit(data, DEFAULT_MAX_RECORD_SIZE)
    }

    /// Decode a record from the front of `data`, rejecting records longer
    /// than `max_record_size`.
    pub fn decode_with_limit(data: &[u8], max_record_size: usize) -> DecodeResult<(Self, usize)> {
        let record_length = Self::peek_length(data)?;

        if record_length < MIN_RECORD_SIZE {
            return Err(DecodeError::InvalidLength(record_length));
        }
        if record_length > max_record_size {
            return Err(DecodeError::TooLarge {
                length: record_length,
                limit: max_record_size,
            });
        }
        if data.len() < record_length {
            return Err(DecodeError::Truncated {
                needed: record_length,
                available: data.len(),
            });
        }

        let checksum_offset = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        verify_checksum(&data[..checksum_offset], stored)?;

        let prefix = Self::peek_prefix(data)?;

        Ok((
            Self {
                opcode: prefix.opcode,
                txid: prefix.txid,
                payload: data[PAYLOAD_OFFSET..checksum_offset].to_vec(),
                checksum: stored,
            },
            record_length,
        ))
    }
}
