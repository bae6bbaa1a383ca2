//! editlog - streaming reader for a filesystem metadata edit log
//!
//! Replay pulls validated, strictly ordered operations out of log segments
//! through [`stream::EditLogInputStream`], whatever medium holds them:
//! a segment file, an in-memory buffer, or several redundant copies.
//!
//! - [`op`]: record framing and checksums
//! - [`stream`]: the input stream and its backends
//! - [`journal`]: segment directories and the streams opened over them
//! - [`replay`]: applying a log from a given transaction onwards
//! - [`config`]: JSON configuration
//! - [`observability`]: structured logging

pub mod config;
pub mod journal;
pub mod observability;
pub mod op;
pub mod replay;
pub mod stream;
