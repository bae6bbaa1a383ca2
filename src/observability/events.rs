//! Observable edit log events
//!
//! Every log line names exactly one of these events. Names are stable,
//! upper-case and underscore separated so they can be grepped and alerted on.

use std::fmt;

/// Events emitted while reading and replaying edit log segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Stream lifecycle
    /// Backend opened and header validated
    StreamOpened,
    /// Stream closed by its owner
    StreamClosed,
    /// Stream rebound to a new position
    StreamRefreshed,
    /// Segment sealed by its journal manager
    SegmentFinalized,
    /// Reader followed an in-progress segment to its finalized name
    SegmentRelocated,

    // Corruption handling
    /// A read failure was converted to end-of-stream
    CorruptionTruncated,
    /// Forward scan found a valid record past damaged bytes
    ResyncRecovered,
    /// Forward scan found nothing recoverable
    ResyncExhausted,
    /// skip_until finished
    SkipComplete,

    // Redundant streams
    /// Switched to another replica after a failure
    ReplicaFailover,
    /// Every replica has failed
    ReplicasExhausted,
    /// Two replicas disagree on the same transaction (FATAL)
    ReplicaDivergence,

    // Journal
    /// Segment files enumerated
    SegmentsDiscovered,
    /// A journal directory could not be listed and was left out
    JournalSkipped,

    // Config
    ConfigLoaded,

    // Replay
    ReplayBegin,
    ReplayComplete,
    /// Transactions missing between two segments
    ReplayGap,
    /// Replay aborted (FATAL)
    ReplayFailed,
}

impl Event {
    /// Returns the event name as it appears in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StreamOpened => "EDITLOG_STREAM_OPENED",
            Event::StreamClosed => "EDITLOG_STREAM_CLOSED",
            Event::StreamRefreshed => "EDITLOG_STREAM_REFRESHED",
            Event::SegmentFinalized => "EDITLOG_SEGMENT_FINALIZED",
            Event::SegmentRelocated => "EDITLOG_SEGMENT_RELOCATED",

            Event::CorruptionTruncated => "EDITLOG_CORRUPTION_TRUNCATED",
            Event::ResyncRecovered => "EDITLOG_RESYNC_RECOVERED",
            Event::ResyncExhausted => "EDITLOG_RESYNC_EXHAUSTED",
            Event::SkipComplete => "EDITLOG_SKIP_COMPLETE",

            Event::ReplicaFailover => "EDITLOG_REPLICA_FAILOVER",
            Event::ReplicasExhausted => "EDITLOG_REPLICAS_EXHAUSTED",
            Event::ReplicaDivergence => "EDITLOG_REPLICA_DIVERGENCE",

            Event::SegmentsDiscovered => "EDITLOG_SEGMENTS_DISCOVERED",
            Event::JournalSkipped => "EDITLOG_JOURNAL_SKIPPED",

            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::ReplayBegin => "EDITLOG_REPLAY_BEGIN",
            Event::ReplayComplete => "EDITLOG_REPLAY_COMPLETE",
            Event::ReplayGap => "EDITLOG_REPLAY_GAP",
            Event::ReplayFailed => "EDITLOG_REPLAY_FAILED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::ReplicaDivergence | Event::ReplayFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
