//! Rate-limited message updates
//!
//! The open segment is mirrored into one outbound message that is edited in
//! place at most once per edit interval. Segments longer than the message
//! limit are cut into several messages.

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ActiveMessage, Segment, SegmentKind, StreamState};
use crate::config::{
    get_presenter_max_message_chars, get_presenter_min_edit_interval,
    PRESENTER_MAX_MESSAGE_CHARS, PRESENTER_MIN_EDIT_INTERVAL_MS,
};
use crate::utils::split_at_chars;

/// Transport identifier of a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub i64);

/// Whether a block is still growing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushStage {
    /// Intermediate state of an open segment
    Partial,
    /// Complete text of a segment or of a split-off head
    Final,
}

/// What a sink is asked to display. Rendering is up to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Plain or thinking
    pub kind: SegmentKind,
    /// Partial or final
    pub stage: FlushStage,
    /// Raw segment text
    pub text: String,
}

impl Outbound {
    /// Whether `other` would look the same on screen.
    ///
    /// Only thinking blocks change appearance when they are finalised.
    #[must_use]
    pub fn displays_like(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.text == other.text
            && (self.kind == SegmentKind::Plain || self.stage == other.stage)
    }
}

/// Result of an accepted edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Message content changed
    Edited,
    /// Transport reported identical content
    NotModified,
}

/// Failure of a single send or edit
#[derive(Debug, Error)]
pub enum SinkError {
    /// Message no longer exists or cannot be edited
    #[error("Message is gone or can no longer be edited")]
    Gone,
    /// Transport asked to slow down
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait
        retry_after_secs: u64,
    },
    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure the presenter could not recover from locally
#[derive(Debug, Error)]
pub enum PresentationError {
    /// Edit failed and the replacement send failed too
    #[error("Edit failed ({edit_error}) and fallback send failed ({send_error})")]
    FallbackFailed {
        /// Error of the edit
        edit_error: SinkError,
        /// Error of the replacement send
        send_error: SinkError,
    },
    /// A fresh send failed
    #[error("Send failed: {0}")]
    SendFailed(#[source] SinkError),
    /// An edit failed for a reason other than the message being gone
    #[error("Edit failed: {0}")]
    EditFailed(#[source] SinkError),
}

/// How many times a final edit waits out a rate limit before giving up
const FINAL_EDIT_ATTEMPTS: usize = 3;

/// Result of showing content in a message
enum Delivery {
    /// The message shows the new content
    Shown(ActiveMessage),
    /// The edit was rate limited; the message keeps its previous content
    Deferred(ActiveMessage, Duration),
}

/// Outbound send/edit capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver a new message.
    async fn send(&self, message: &Outbound) -> Result<MessageHandle, SinkError>;

    /// Replace the content of a delivered message.
    async fn edit(
        &self,
        handle: &MessageHandle,
        message: &Outbound,
    ) -> Result<EditOutcome, SinkError>;
}

/// Presenter thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterConfig {
    /// Longest text a single message may carry, in characters
    pub max_message_chars: usize,
    /// Minimum time between two time-driven flushes
    pub min_edit_interval: Duration,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            max_message_chars: PRESENTER_MAX_MESSAGE_CHARS,
            min_edit_interval: Duration::from_millis(PRESENTER_MIN_EDIT_INTERVAL_MS),
        }
    }
}

impl PresenterConfig {
    /// Thresholds with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_message_chars: get_presenter_max_message_chars().max(1),
            min_edit_interval: get_presenter_min_edit_interval(),
        }
    }
}

/// Turns segment state into sends and edits on a [`MessageSink`]
pub struct Presenter<S: MessageSink> {
    sink: S,
    config: PresenterConfig,
}

impl<S: MessageSink> Presenter<S> {
    /// Create a presenter over `sink`.
    pub fn new(sink: S, config: PresenterConfig) -> Self {
        let config = PresenterConfig {
            max_message_chars: config.max_message_chars.max(1),
            ..config
        };
        Self { sink, config }
    }

    /// The wrapped sink.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Active thresholds.
    pub const fn config(&self) -> &PresenterConfig {
        &self.config
    }

    /// Show `outbound` in the active message, or in a new one.
    ///
    /// No transport call is made when the active message already looks
    /// like this content. A rate-limited edit keeps the message and holds
    /// further time-driven flushes back until the transport allows them.
    ///
    /// # Errors
    ///
    /// Returns `PresentationError` if the content could not be shown.
    pub async fn flush(
        &self,
        state: &mut StreamState,
        outbound: Outbound,
    ) -> Result<(), PresentationError> {
        let previous = state.active.take();
        let unchanged = previous
            .as_ref()
            .is_some_and(|active| active.displayed.displays_like(&outbound));

        match self.deliver(previous, outbound).await? {
            Delivery::Shown(active) => {
                state.active = Some(active);
                state.resume_at = None;
                if !unchanged {
                    state.last_flush = Some(Instant::now());
                }
            }
            Delivery::Deferred(active, wait) => {
                state.active = Some(active);
                state.resume_at = Some(Instant::now() + wait);
            }
        }
        Ok(())
    }

    /// Flush the open segment if the length or time threshold says so.
    ///
    /// Over-long text is cut at exactly the limit: each head is finalised
    /// and the active message is dropped so the rest starts a new one.
    ///
    /// # Errors
    ///
    /// Returns `PresentationError` from an unrecoverable flush.
    pub async fn maybe_flush(&self, state: &mut StreamState) -> Result<(), PresentationError> {
        let max = self.config.max_message_chars;

        while state.current_segment.chars().count() > max {
            let (head, tail) = split_at_chars(&state.current_segment, max);
            let (head, tail) = (head.to_string(), tail.to_string());
            debug!(kind = ?state.mode, "Segment exceeds message limit, splitting");

            let outbound = Outbound {
                kind: state.mode,
                stage: FlushStage::Final,
                text: head,
            };
            self.deliver_final(state.active.take(), outbound).await?;
            state.current_segment = tail;
            state.last_flush = Some(Instant::now());
            state.resume_at = None;
        }

        if state.current_segment.trim().is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let throttled = state.resume_at.is_some_and(|at| now < at);
        let due = state
            .last_flush
            .map_or(true, |at| now.duration_since(at) >= self.config.min_edit_interval);
        if due && !throttled {
            let outbound = Outbound {
                kind: state.mode,
                stage: FlushStage::Partial,
                text: state.current_segment.clone(),
            };
            self.flush(state, outbound).await?;
        }
        Ok(())
    }

    /// Deliver the final form of a closed segment and release its message.
    ///
    /// A rate-limited final edit is retried after the requested wait.
    ///
    /// # Errors
    ///
    /// Returns `PresentationError` from an unrecoverable flush.
    pub async fn finish_segment(
        &self,
        state: &mut StreamState,
        segment: Segment,
    ) -> Result<(), PresentationError> {
        let Segment {
            kind,
            mut text,
            mut active,
        } = segment;
        let max = self.config.max_message_chars;

        while text.chars().count() > max {
            let (head, tail) = split_at_chars(&text, max);
            let outbound = Outbound {
                kind,
                stage: FlushStage::Final,
                text: head.to_string(),
            };
            let tail = tail.to_string();
            self.deliver_final(active.take(), outbound).await?;
            state.last_flush = Some(Instant::now());
            text = tail;
        }

        if text.trim().is_empty() {
            return Ok(());
        }

        let outbound = Outbound {
            kind,
            stage: FlushStage::Final,
            text,
        };
        let unchanged = active
            .as_ref()
            .is_some_and(|current| current.displayed.displays_like(&outbound));
        self.deliver_final(active, outbound).await?;
        state.resume_at = None;
        if !unchanged {
            state.last_flush = Some(Instant::now());
        }
        Ok(())
    }

    /// Send a standalone notice, such as an error message.
    ///
    /// # Errors
    ///
    /// Returns `PresentationError::SendFailed` if the send fails.
    pub async fn notify(&self, text: &str) -> Result<MessageHandle, PresentationError> {
        let outbound = Outbound {
            kind: SegmentKind::Plain,
            stage: FlushStage::Final,
            text: text.to_string(),
        };
        self.sink
            .send(&outbound)
            .await
            .map_err(PresentationError::SendFailed)
    }

    async fn deliver_final(
        &self,
        mut active: Option<ActiveMessage>,
        outbound: Outbound,
    ) -> Result<ActiveMessage, PresentationError> {
        let mut attempt = 1;
        loop {
            match self.deliver(active, outbound.clone()).await? {
                Delivery::Shown(shown) => return Ok(shown),
                Delivery::Deferred(kept, wait) if attempt < FINAL_EDIT_ATTEMPTS => {
                    debug!(
                        handle = kept.handle.0,
                        wait_secs = wait.as_secs(),
                        "Final edit rate limited, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    active = Some(kept);
                    attempt += 1;
                }
                Delivery::Deferred(kept, _) => {
                    warn!(
                        handle = kept.handle.0,
                        "Final edit still rate limited, leaving the message as it is"
                    );
                    return Ok(kept);
                }
            }
        }
    }

    async fn deliver(
        &self,
        active: Option<ActiveMessage>,
        outbound: Outbound,
    ) -> Result<Delivery, PresentationError> {
        let Some(active) = active else {
            let handle = self
                .sink
                .send(&outbound)
                .await
                .map_err(PresentationError::SendFailed)?;
            return Ok(Delivery::Shown(ActiveMessage {
                handle,
                displayed: outbound,
            }));
        };

        if active.displayed.displays_like(&outbound) {
            return Ok(Delivery::Shown(ActiveMessage {
                handle: active.handle,
                displayed: outbound,
            }));
        }

        match self.sink.edit(&active.handle, &outbound).await {
            Ok(_) => Ok(Delivery::Shown(ActiveMessage {
                handle: active.handle,
                displayed: outbound,
            })),
            Err(SinkError::RateLimited { retry_after_secs }) => {
                debug!(
                    handle = active.handle.0,
                    retry_after_secs, "Edit rate limited, keeping the message"
                );
                let wait = Duration::from_secs(retry_after_secs.max(1));
                Ok(Delivery::Deferred(active, wait))
            }
            Err(SinkError::Gone) => {
                warn!(handle = active.handle.0, "Message is gone, sending a new one");
                match self.sink.send(&outbound).await {
                    Ok(handle) => Ok(Delivery::Shown(ActiveMessage {
                        handle,
                        displayed: outbound,
                    })),
                    Err(send_error) => Err(PresentationError::FallbackFailed {
                        edit_error: SinkError::Gone,
                        send_error,
                    }),
                }
            }
            Err(edit_error) => Err(PresentationError::EditFailed(edit_error)),
        }
    }
}
