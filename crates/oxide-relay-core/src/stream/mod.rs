//! Segment reassembly and incremental presentation
//!
//! A generation turn owns one [`StreamState`]. The reassembler folds raw
//! text chunks into it and cuts segments at sentinel boundaries; the
//! presenter turns the open segment and every finished one into message
//! sends and edits.

/// Rate-limited message updates
pub mod presenter;
/// Sentinel-driven segment state machine
pub mod reassembler;
/// Driver that wires a text stream through both
pub mod session;

use tokio::time::Instant;

pub use presenter::{
    EditOutcome, FlushStage, MessageHandle, MessageSink, Outbound, PresentationError, Presenter,
    PresenterConfig, SinkError,
};
#[cfg(test)]
pub use presenter::MockMessageSink;
pub use reassembler::{SegmentReassembler, SentinelSet};
pub use session::{present_stream, StreamEnd, StreamOutcome};

/// Kind of text between sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SegmentKind {
    /// Answer text
    #[default]
    Plain,
    /// Reasoning text between sentinel tags
    Thinking,
}

/// Message currently showing the open segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMessage {
    /// Transport handle
    pub handle: MessageHandle,
    /// Last content delivered to it
    pub displayed: Outbound,
}

/// A segment closed by a sentinel or by the end of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Plain or thinking
    pub kind: SegmentKind,
    /// Full text of the segment, sentinels excluded
    pub text: String,
    /// Message that displayed the segment while it was open, if any
    pub active: Option<ActiveMessage>,
}

/// Per-turn mutable state, owned by the task handling the turn
#[derive(Debug, Default)]
pub struct StreamState {
    pub(crate) processing_buffer: String,
    pub(crate) current_segment: String,
    pub(crate) mode: SegmentKind,
    pub(crate) active: Option<ActiveMessage>,
    pub(crate) last_flush: Option<Instant>,
    pub(crate) resume_at: Option<Instant>,
}

impl StreamState {
    /// Fresh state for a new turn.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw text not yet classified (a possible partial sentinel).
    #[must_use]
    pub fn processing_buffer(&self) -> &str {
        &self.processing_buffer
    }

    /// Text of the open segment.
    #[must_use]
    pub fn current_segment(&self) -> &str {
        &self.current_segment
    }

    /// Kind of the open segment.
    #[must_use]
    pub const fn mode(&self) -> SegmentKind {
        self.mode
    }

    /// Whether the open segment is a thinking block.
    #[must_use]
    pub fn in_think_block(&self) -> bool {
        self.mode == SegmentKind::Thinking
    }

    /// Handle of the message showing the open segment.
    #[must_use]
    pub fn active_handle(&self) -> Option<&MessageHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    /// Time of the last transport call for this turn.
    #[must_use]
    pub const fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    /// Earliest time the transport accepts another edit, after a rate limit.
    #[must_use]
    pub const fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }
}
