//! Stream driver
//!
//! Pulls a tagged text stream through the reassembler and presenter until
//! it ends, fails or is cancelled, then finalises the open segment.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::presenter::{MessageSink, Presenter};
use super::reassembler::SegmentReassembler;
use super::StreamState;
use crate::llm::TextStream;

/// How a presented stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Upstream finished normally
    Completed,
    /// Cancellation token fired
    Cancelled,
    /// Upstream failed after output had started
    Interrupted,
    /// Transport refused an edit or a send
    PresentationFailed,
}

/// Result of one presented turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Answer text received so far, thinking removed and trimmed
    pub answer: String,
    /// Termination reason
    pub end: StreamEnd,
    /// Error description for `Interrupted` and `PresentationFailed`
    pub error: Option<String>,
}

/// Drive `stream` to completion through `presenter`.
///
/// The open segment is finalised on every exit path except a presentation
/// failure, including cancellation. After an interruption or a presentation
/// failure a notice is sent as its own message.
pub async fn present_stream<S: MessageSink>(
    mut stream: TextStream,
    reassembler: &SegmentReassembler,
    presenter: &Presenter<S>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let mut state = StreamState::new();
    let mut raw = String::new();
    let mut end = StreamEnd::Completed;
    let mut error = None;

    'stream: loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                end = StreamEnd::Cancelled;
                break 'stream;
            }
            item = stream.next() => item,
        };

        match next {
            None => break,
            Some(Ok(chunk)) => {
                raw.push_str(&chunk);
                for segment in reassembler.feed(&mut state, &chunk) {
                    if let Err(e) = presenter.finish_segment(&mut state, segment).await {
                        end = StreamEnd::PresentationFailed;
                        error = Some(e.to_string());
                        break 'stream;
                    }
                }
                if let Err(e) = presenter.maybe_flush(&mut state).await {
                    end = StreamEnd::PresentationFailed;
                    error = Some(e.to_string());
                    break;
                }
            }
            Some(Err(e)) => {
                end = StreamEnd::Interrupted;
                error = Some(e.to_string());
                break;
            }
        }
    }

    // Releases the upstream connection before the final transport calls
    drop(stream);

    if end != StreamEnd::PresentationFailed {
        if let Some(segment) = reassembler.finish(&mut state) {
            if let Err(e) = presenter.finish_segment(&mut state, segment).await {
                end = StreamEnd::PresentationFailed;
                error = Some(e.to_string());
            }
        }
    }

    match end {
        StreamEnd::Interrupted | StreamEnd::PresentationFailed => {
            warn!(end = ?end, error = ?error, "Turn ended abnormally");
            let notice = error_notice(end);
            if let Err(e) = presenter.notify(notice).await {
                warn!(error = %e, "Failed to deliver error notice");
            }
        }
        StreamEnd::Completed | StreamEnd::Cancelled => {
            debug!(end = ?end, chars = raw.len(), "Turn finished");
        }
    }

    StreamOutcome {
        answer: reassembler.plain_text(&raw).trim().to_string(),
        end,
        error,
    }
}

const fn error_notice(end: StreamEnd) -> &'static str {
    match end {
        StreamEnd::PresentationFailed => "⚠️ Could not deliver the rest of the answer.",
        _ => "⚠️ The model stopped responding. The answer above may be incomplete.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, RouteError};
    use crate::stream::presenter::{MockMessageSink, PresenterConfig};
    use crate::testing::{recorded, recording_sink, text_stream, CallLog};
    use futures_util::stream;
    use std::time::Duration;

    fn presenter(sink: MockMessageSink) -> Presenter<MockMessageSink> {
        Presenter::new(
            sink,
            PresenterConfig {
                max_message_chars: 4000,
                min_edit_interval: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_block_gets_its_own_message() {
        let calls = CallLog::default();
        let presenter = presenter(recording_sink(&calls));

        let outcome = present_stream(
            text_stream(vec![
                Ok("Hello "),
                Ok("<think>reasoning here</think>"),
                Ok(" world"),
            ]),
            &SegmentReassembler::new(),
            &presenter,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.end, StreamEnd::Completed);
        assert_eq!(outcome.answer, "Hello  world");
        let log = recorded(&calls);
        assert_eq!(
            log,
            vec![
                "send#1 Plain Partial Hello ",
                "send#2 Thinking Final reasoning here",
                "send#3 Plain Final  world",
            ]
        );
    }

    #[tokio::test]
    async fn test_interruption_keeps_partial_answer_and_notifies() {
        let calls = CallLog::default();
        let presenter = presenter(recording_sink(&calls));

        let outcome = present_stream(
            text_stream(vec![
                Ok("Partial answer"),
                Err(RouteError::StreamInterrupted(LlmError::NetworkError(
                    "reset".into(),
                ))),
            ]),
            &SegmentReassembler::new(),
            &presenter,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.end, StreamEnd::Interrupted);
        assert_eq!(outcome.answer, "Partial answer");
        assert!(outcome.error.is_some_and(|e| e.contains("reset")));
        let log = recorded(&calls);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "send#1 Plain Partial Partial answer");
        assert!(log[1].starts_with("send#2 Plain Final ⚠️"));
    }

    #[tokio::test]
    async fn test_cancel_flushes_open_segment() {
        let calls = CallLog::default();
        let presenter = presenter(recording_sink(&calls));
        let cancel = CancellationToken::new();

        let first: TextStream = text_stream(vec![Ok("<think>half a thought")]);
        let stream: TextStream = Box::pin(first.chain(stream::pending()));

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let outcome = present_stream(stream, &SegmentReassembler::new(), &presenter, &cancel).await;

        assert_eq!(outcome.end, StreamEnd::Cancelled);
        assert_eq!(outcome.answer, "");
        let log = recorded(&calls);
        assert_eq!(
            log,
            vec![
                "send#1 Thinking Partial half a thought",
                "edit#1 Thinking Final half a thought",
            ]
        );
    }
}
