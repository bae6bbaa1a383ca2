//! Edit log input streams
//!
//! An [`EditLogInputStream`] delivers validated operations in strictly
//! increasing transaction order from one [`StreamBackend`]:
//! - [`FileBackend`]: a single segment file
//! - [`MemoryBackend`]: operations already in memory
//! - [`RedundantBackend`]: several replicas of the same range
//!
//! # Failure policy
//!
//! `read_op` is strict: any I/O or decode failure is returned to the caller.
//! `resync` is lenient: it asks the backend for the next operation it can
//! vouch for and reads as end of stream when there is none. Data is only
//! ever dropped on an explicit `resync`.

mod backend;
mod errors;
mod file;
mod input;
mod memory;
mod redundant;

pub use backend::{JournalType, StreamBackend};
pub use errors::{Severity, StreamError, StreamErrorCode, StreamResult};
pub use file::{encode_header, FileBackend, HEADER_SIZE, LAYOUT_VERSION, SEGMENT_MAGIC};
pub use input::{DynEditLogInputStream, EditLogInputStream, InProgressFlag, Ops};
pub use memory::MemoryBackend;
pub use redundant::RedundantBackend;
