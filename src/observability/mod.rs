//! Observability for edit log readers
//!
//! Structured, synchronous JSON logging with typed event names.
//!
//! ```ignore
//! use editlog::observability::{Event, Logger};
//!
//! Logger::warn(Event::CorruptionTruncated, &[("stream", "edits_1-100")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};
