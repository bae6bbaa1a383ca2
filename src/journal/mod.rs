//! Journal managers
//!
//! A journal manager owns the storage of edit log segments and hands out
//! input streams over them. Streams keep a weak reference back to the
//! manager that produced them; the manager's owner decides its lifetime.

mod manager;
mod segment;
mod set;
mod writer;

use std::fmt;

use crate::stream::JournalType;

pub use manager::FileJournalManager;
pub use segment::{finalized_name, in_progress_name, parse_segment_name, SegmentInfo};
pub use set::JournalSet;
pub use writer::SegmentWriter;

/// Owner of a set of edit log segments.
pub trait JournalManager: Send + Sync + fmt::Debug {
    /// Medium the managed segments live on
    fn journal_type(&self) -> JournalType;

    /// Human-readable description for logs and errors
    fn describe(&self) -> String;
}
