//! Resilient messaging with automatic retry for Telegram API operations.
//!
//! Only transport-level failures (network, I/O) are retried with backoff.
//! API answers are final and are classified into [`SinkError`]s. A message
//! whose HTML Telegram refuses to parse, or which formatting made too long,
//! is re-sent as plain text.

use std::future::IntoFuture;
use std::sync::Arc;

use oxide_relay_core::stream::{EditOutcome, SinkError};
use oxide_relay_core::utils::retry_transport_operation;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

/// How a failed request should be treated
#[derive(Debug)]
pub(crate) enum Failure {
    /// Edit carried identical content
    NotModified,
    /// The HTML form was rejected; the plain text may still go through
    Unrenderable(String),
    /// Final error for the caller
    Fatal(SinkError),
}

pub(crate) fn classify(err: &RequestError) -> Failure {
    match err {
        RequestError::Api(ApiError::MessageNotModified) => Failure::NotModified,
        RequestError::Api(
            ApiError::MessageToEditNotFound
            | ApiError::MessageCantBeEdited
            | ApiError::MessageIdInvalid,
        ) => Failure::Fatal(SinkError::Gone),
        RequestError::Api(ApiError::CantParseEntities(reason)) => {
            Failure::Unrenderable(reason.clone())
        }
        RequestError::Api(ApiError::MessageIsTooLong) => {
            Failure::Unrenderable("message is too long once formatted".to_string())
        }
        RequestError::RetryAfter(secs) => Failure::Fatal(SinkError::RateLimited {
            retry_after_secs: u64::from(secs.seconds()),
        }),
        other => Failure::Fatal(SinkError::Transport(other.to_string())),
    }
}

fn is_transient(err: &RequestError) -> bool {
    matches!(err, RequestError::Network(_) | RequestError::Io(_))
}

/// Run `request` with backoff on transient errors; API errors come back as `Ok(Err(_))`.
async fn with_retry<T, F, Fut>(label: &'static str, mut request: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RequestError>>,
{
    let outcome = retry_transport_operation(|| {
        let fut = request();
        async move {
            match fut.await {
                Ok(value) => Ok(Ok(value)),
                Err(e) if is_transient(&e) => {
                    debug!(operation = label, error = %e, "Transient Telegram error");
                    Err(anyhow::Error::new(e))
                }
                Err(e) => Ok(Err(e)),
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(e) => match e.downcast::<RequestError>() {
            Ok(request_error) => Err(request_error),
            Err(other) => Err(RequestError::Io(Arc::new(std::io::Error::other(
                other.to_string(),
            )))),
        },
    }
}

/// Send an HTML message, falling back to `plain` if Telegram rejects the HTML form.
///
/// # Errors
///
/// Returns the classified [`SinkError`] once retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    html: &str,
    plain: &str,
) -> Result<Message, SinkError> {
    let sent = with_retry("send", || {
        bot.send_message(chat_id, html.to_string())
            .parse_mode(ParseMode::Html)
            .into_future()
    })
    .await;

    let err = match sent {
        Ok(message) => return Ok(message),
        Err(err) => err,
    };

    match classify(&err) {
        Failure::Unrenderable(reason) => {
            warn!(reason = %reason, "HTML form rejected, sending as plain text");
            with_retry("send_plain", || {
                bot.send_message(chat_id, plain.to_string()).into_future()
            })
            .await
            .map_err(|e| match classify(&e) {
                Failure::Fatal(sink) => sink,
                _ => SinkError::Transport(e.to_string()),
            })
        }
        Failure::NotModified => Err(SinkError::Transport(err.to_string())),
        Failure::Fatal(sink) => Err(sink),
    }
}

/// Edit a message to HTML content, with the same plain-text fallback.
///
/// "Message is not modified" counts as success.
///
/// # Errors
///
/// Returns the classified [`SinkError`] once retries are exhausted.
pub async fn edit_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    html: &str,
    plain: &str,
) -> Result<EditOutcome, SinkError> {
    let edited = with_retry("edit", || {
        bot.edit_message_text(chat_id, message_id, html.to_string())
            .parse_mode(ParseMode::Html)
            .into_future()
    })
    .await;

    let err = match edited {
        Ok(_) => return Ok(EditOutcome::Edited),
        Err(err) => err,
    };

    match classify(&err) {
        Failure::NotModified => Ok(EditOutcome::NotModified),
        Failure::Unrenderable(reason) => {
            warn!(reason = %reason, "HTML form rejected, editing as plain text");
            match with_retry("edit_plain", || {
                bot.edit_message_text(chat_id, message_id, plain.to_string())
                    .into_future()
            })
            .await
            {
                Ok(_) => Ok(EditOutcome::Edited),
                Err(e) => match classify(&e) {
                    Failure::NotModified => Ok(EditOutcome::NotModified),
                    Failure::Fatal(sink) => Err(sink),
                    Failure::Unrenderable(_) => Err(SinkError::Transport(e.to_string())),
                },
            }
        }
        Failure::Fatal(sink) => Err(sink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(matches!(
            classify(&RequestError::Api(ApiError::MessageNotModified)),
            Failure::NotModified
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::MessageToEditNotFound)),
            Failure::Fatal(SinkError::Gone)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::MessageCantBeEdited)),
            Failure::Fatal(SinkError::Gone)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::CantParseEntities("bad tag".into()))),
            Failure::Unrenderable(reason) if reason == "bad tag"
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::MessageIsTooLong)),
            Failure::Unrenderable(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::BotBlocked)),
            Failure::Fatal(SinkError::Transport(_))
        ));
    }

    #[test]
    fn test_only_transport_errors_are_retried() {
        let io = RequestError::Io(Arc::new(std::io::Error::other("reset")));
        assert!(is_transient(&io));
        assert!(!is_transient(&RequestError::Api(ApiError::MessageNotModified)));
    }
}
