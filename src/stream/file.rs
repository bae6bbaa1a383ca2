//! File segment backend
//!
//! A segment file is an 8-byte header followed by framed records:
//! - Magic (4 bytes): `EDLG`
//! - Layout Version (i32 LE)
//! - Records, back to back (see `op::EditLogOp`)
//!
//! Strict reads stop at the first bad record and leave the cursor on it.
//! `next_valid_op` instead scans forward byte by byte for the next record
//! whose length, checksum and opcode all validate and whose txid is newer
//! than anything read so far. Candidates are screened on their fixed prefix
//! before any body is read. Tail truncation after a crash is the common
//! case; a torn record in the middle of a finalized segment is the rare one.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::StreamConfig;
use crate::journal::{parse_segment_name, SegmentInfo};
use crate::observability::{Event, Logger};
use crate::op::{
    DecodeError, EditLogOp, RecordPrefix, LENGTH_PREFIX_SIZE, MIN_RECORD_SIZE, RECORD_PREFIX_SIZE,
};

use super::backend::{JournalType, StreamBackend};
use super::errors::{StreamError, StreamErrorCode, StreamResult};

/// Segment file magic
pub const SEGMENT_MAGIC: [u8; 4] = *b"EDLG";

/// Layout version written by this crate and the only one it reads
pub const LAYOUT_VERSION: i32 = 1;

/// Bytes before the first record
pub const HEADER_SIZE: u64 = 8;

/// Encodes the header a segment file starts with.
pub fn encode_header(version: i32) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..4].copy_from_slice(&SEGMENT_MAGIC);
    header[4..].copy_from_slice(&version.to_le_bytes());
    header
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Backend reading one segment file.
pub struct FileBackend {
    path: PathBuf,
    name: String,
    first_txid: u64,
    last_txid: Option<u64>,
    max_record_size: usize,
    max_resync_scan_bytes: u64,
    reader: Option<BufReader<File>>,
    /// Where the underlying reader currently is; `None` forces a seek.
    reader_offset: Option<u64>,
    /// Offset of the next record to decode
    offset: u64,
    file_size: u64,
    version: Option<i32>,
    last_txid_read: Option<u64>,
}

impl FileBackend {
    /// Backend for the segment at `path` covering `first_txid..=last_txid`.
    ///
    /// Nothing is opened until the owning stream first reads.
    pub fn new(path: &Path, first_txid: u64, last_txid: Option<u64>, config: &StreamConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            name: display_name(path),
            first_txid,
            last_txid,
            max_record_size: config.max_record_size,
            max_resync_scan_bytes: config.max_resync_scan_bytes,
            reader: None,
            reader_offset: None,
            offset: 0,
            file_size: 0,
            version: None,
            last_txid_read: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalized segment an in-progress segment was renamed to.
    ///
    /// Only applies while this backend has no upper bound and its file is
    /// named as an in-progress segment that no longer exists.
    fn finalized_location(&self) -> Option<SegmentInfo> {
        if self.last_txid.is_some() || self.path.exists() {
            return None;
        }
        let name = self.path.file_name()?.to_str()?;
        if parse_segment_name(name) != Some((self.first_txid, None)) {
            return None;
        }

        fs::read_dir(self.path.parent()?)
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|entry| SegmentInfo::from_path(&entry.path()))
            .find(|s| s.first_txid == self.first_txid && !s.is_in_progress())
    }

    /// Follows the segment to its finalized name and takes on its bound.
    fn follow_finalized(&mut self) -> bool {
        let segment = match self.finalized_location() {
            Some(segment) => segment,
            None => return false,
        };

        Logger::info(
            Event::SegmentRelocated,
            &[
                ("from", &self.name),
                ("to", &display_name(&segment.path)),
                ("last_txid", &segment.last_txid.map_or_else(String::new, |t| t.to_string())),
            ],
        );
        self.name = display_name(&segment.path);
        self.path = segment.path;
        self.last_txid = segment.last_txid;
        true
    }

    fn reader(&mut self) -> StreamResult<&mut BufReader<File>> {
        let name = &self.name;
        self.reader.as_mut().ok_or_else(|| {
            StreamError::io(
                format!("Segment not open: {}", name),
                io::Error::new(io::ErrorKind::NotConnected, "segment not open"),
            )
        })
    }

    fn stat(&mut self) -> StreamResult<u64> {
        let len = self
            .reader()?
            .get_ref()
            .metadata()
            .map_err(|e| StreamError::io("Failed to read segment metadata", e))?
            .len();
        self.file_size = len;
        Ok(len)
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> StreamResult<()> {
        if self.reader_offset != Some(offset) {
            self.reader_offset = None;
            self.reader()?
                .seek(SeekFrom::Start(offset))
                .map_err(|e| StreamError::io(format!("Failed to seek to byte {}", offset), e))?;
        }
        let result = self.reader()?.read_exact(buf);
        match result {
            Ok(()) => {
                self.reader_offset = Some(offset + buf.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.reader_offset = None;
                Err(StreamError::io(format!("Failed to read at byte {}", offset), e))
            }
        }
    }

    /// Reads and validates the header once the file is long enough to hold one.
    fn read_header(&mut self) -> StreamResult<()> {
        if self.version.is_some() || self.file_size < HEADER_SIZE {
            return Ok(());
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        self.read_exact_at(0, &mut header)?;

        if header[..4] != SEGMENT_MAGIC {
            return Err(StreamError::version_unknown(format!(
                "Bad segment magic in {}: {:02x?}",
                self.name,
                &header[..4]
            )));
        }
        let version = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != LAYOUT_VERSION {
            return Err(StreamError::version_unknown(format!(
                "Unsupported layout version {} in {} (supported: {})",
                version, self.name, LAYOUT_VERSION
            )));
        }

        self.version = Some(version);
        self.offset = self.offset.max(HEADER_SIZE);
        Ok(())
    }

    /// Decodes the record starting at `offset`.
    ///
    /// `Ok(None)` at end of file. Framing problems, including a record cut
    /// short by the end of the file, come back as decode errors.
    fn decode_at(&mut self, offset: u64) -> StreamResult<Option<(EditLogOp, u64)>> {
        if offset >= self.file_size {
            return Ok(None);
        }
        let remaining = self.file_size - offset;

        if remaining < LENGTH_PREFIX_SIZE as u64 {
            return Err(StreamError::decode_at_offset(
                offset,
                DecodeError::Truncated {
                    needed: LENGTH_PREFIX_SIZE,
                    available: remaining as usize,
                },
            ));
        }

        let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
        self.read_exact_at(offset, &mut len_buf)?;
        let record_length = EditLogOp::peek_length(&len_buf)
            .map_err(|e| StreamError::decode_at_offset(offset, e))?;

        if record_length < MIN_RECORD_SIZE {
            return Err(StreamError::decode_at_offset(offset, DecodeError::InvalidLength(record_length)));
        }
        if record_length > self.max_record_size {
            return Err(StreamError::decode_at_offset(
                offset,
                DecodeError::TooLarge {
                    length: record_length,
                    limit: self.max_record_size,
                },
            ));
        }
        if record_length as u64 > remaining {
            return Err(StreamError::decode_at_offset(
                offset,
                DecodeError::Truncated {
                    needed: record_length,
                    available: remaining as usize,
                },
            ));
        }

        let mut record = vec![0u8; record_length];
        record[..LENGTH_PREFIX_SIZE].copy_from_slice(&len_buf);
        self.read_exact_at(offset + LENGTH_PREFIX_SIZE as u64, &mut record[LENGTH_PREFIX_SIZE..])?;

        let (op, consumed) = EditLogOp::decode_with_limit(&record, self.max_record_size)
            .map_err(|e| StreamError::decode_at_offset(offset, e))?;
        Ok(Some((op, consumed as u64)))
    }

    /// Whether a record with this prefix could be the next one to deliver.
    ///
    /// Checked before any payload is read, so a scan over garbage costs one
    /// bounds check per byte instead of one read per byte.
    fn plausible(&self, prefix: &RecordPrefix, remaining: u64) -> bool {
        prefix.length >= MIN_RECORD_SIZE
            && prefix.length <= self.max_record_size
            && prefix.length as u64 <= remaining
            && self.is_newer_txid(prefix.txid)
            && self.last_txid.map_or(true, |last| prefix.txid <= last)
    }

    /// First offset in `start..end` holding a complete valid record newer
    /// than anything read, with the record and its length.
    ///
    /// The window is read once; only candidates whose prefix is plausible
    /// are decoded from the file.
    fn scan_for_record(&mut self, start: u64, end: u64) -> Option<(EditLogOp, u64, u64)> {
        if start >= end {
            return None;
        }
        let window_end = self.file_size.min(end + RECORD_PREFIX_SIZE as u64);
        let mut window = vec![0u8; (window_end - start) as usize];
        self.read_exact_at(start, &mut window).ok()?;

        for candidate in start..end {
            let at = (candidate - start) as usize;
            let prefix = match window.get(at..at + RECORD_PREFIX_SIZE) {
                Some(bytes) => bytes,
                // Too close to the end of the file for any record to fit.
                None => return None,
            };
            match EditLogOp::peek_prefix(prefix) {
                Ok(prefix) if self.plausible(&prefix, self.file_size - candidate) => {}
                _ => continue,
            }

            match self.decode_at(candidate) {
                Ok(Some((op, len))) => return Some((op, candidate, len)),
                Ok(None) => return None,
                Err(e) if e.code() == StreamErrorCode::EditlogIoFailed => return None,
                Err(_) => continue,
            }
        }
        None
    }

    fn accept(&mut self, op: &EditLogOp, next_offset: u64) {
        self.offset = next_offset;
        self.last_txid_read = Some(op.txid());
    }

    fn is_newer_txid(&self, txid: u64) -> bool {
        match self.last_txid_read {
            Some(last) => txid > last,
            None => txid >= self.first_txid,
        }
    }
}

impl StreamBackend for FileBackend {
    fn open(&mut self) -> StreamResult<()> {
        let file = match File::open(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.follow_finalized() => {
                File::open(&self.path)
            }
            result => result,
        }
        .map_err(|e| {
            StreamError::io(format!("Failed to open segment: {}", self.path.display()), e)
        })?;
        self.reader = Some(BufReader::new(file));
        self.reader_offset = Some(0);
        self.offset = 0;
        self.stat()?;
        self.read_header()
    }

    fn next_op(&mut self) -> StreamResult<Option<EditLogOp>> {
        if self.version.is_none() {
            // In-progress segment whose header has not been written yet.
            return Ok(None);
        }
        match self.decode_at(self.offset)? {
            Some((op, len)) => {
                self.accept(&op, self.offset + len);
                Ok(Some(op))
            }
            None => Ok(None),
        }
    }

    fn next_valid_op(&mut self) -> Option<EditLogOp> {
        let failed_at = self.offset;
        let first_error = match self.next_op() {
            Ok(op) => return op,
            Err(e) if e.code() == StreamErrorCode::EditlogIoFailed => {
                // The medium itself failed; scanning it would fail the same way.
                let message = e.to_string();
                Logger::warn(
                    Event::CorruptionTruncated,
                    &[("stream", &self.name), ("error", &message)],
                );
                return None;
            }
            Err(e) => e.to_string(),
        };

        let scan_end = self
            .file_size
            .min(failed_at.saturating_add(1).saturating_add(self.max_resync_scan_bytes));

        if let Some((op, candidate, len)) = self.scan_for_record(failed_at + 1, scan_end) {
            self.accept(&op, candidate + len);
            Logger::warn(
                Event::ResyncRecovered,
                &[
                    ("stream", &self.name),
                    ("failed_at", &failed_at.to_string()),
                    ("resumed_at", &candidate.to_string()),
                    ("skipped_bytes", &(candidate - failed_at).to_string()),
                    ("txid", &op.txid().to_string()),
                    ("error", &first_error),
                ],
            );
            return Some(op);
        }

        Logger::warn(
            Event::ResyncExhausted,
            &[
                ("stream", &self.name),
                ("failed_at", &failed_at.to_string()),
                ("scanned_to", &scan_end.to_string()),
                ("error", &first_error),
            ],
        );
        // Nothing was consumed: a writer may still complete a torn tail.
        self.offset = failed_at;
        None
    }

    fn version(&mut self) -> StreamResult<i32> {
        self.version
            .ok_or_else(|| StreamError::version_unknown(format!("Segment {} has no header yet", self.name)))
    }

    fn position(&self) -> StreamResult<u64> {
        Ok(self.offset)
    }

    fn set_position(&mut self, position: u64) -> StreamResult<()> {
        if position > self.file_size {
            return Err(StreamError::io(
                format!("Position {} beyond end of {} ({} bytes)", position, self.name, self.file_size),
                io::Error::new(io::ErrorKind::InvalidInput, "position out of range"),
            ));
        }
        self.offset = position;
        self.last_txid_read = None;
        Ok(())
    }

    fn length(&self) -> StreamResult<u64> {
        Ok(self.file_size)
    }

    fn refresh(&mut self, position: u64, skipped_until_txid: u64) -> StreamResult<()> {
        // In-progress segments grow between refreshes and may have been
        // finalized since; the open handle survives the rename.
        self.follow_finalized();
        self.stat()?;
        self.read_header()?;
        self.set_position(position.max(HEADER_SIZE.min(self.file_size)))?;
        self.last_txid_read = skipped_until_txid.checked_sub(1);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn journal_type(&self) -> JournalType {
        JournalType::File
    }

    fn first_txid(&self) -> u64 {
        self.first_txid
    }

    fn last_txid(&self) -> Option<u64> {
        self.last_txid
    }

    fn close(&mut self) -> StreamResult<()> {
        self.reader = None;
        self.reader_offset = None;
        Ok(())
    }
}
