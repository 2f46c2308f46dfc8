//! One conversation turn: build the prompt, stream the reply, persist both sides.

use anyhow::Result;
use oxide_relay_core::llm::{ChatBackend, ChatMessage, RouteError};
use oxide_relay_core::storage::{StorageProvider, UserProfile};
use oxide_relay_core::stream::{
    present_stream, MessageSink, Presenter, SegmentReassembler, StreamOutcome,
};
use oxide_relay_core::utils::truncate_str;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::views::route_error_notice;

/// Inputs of a single turn
#[derive(Debug, Clone, Copy)]
pub struct ChatTurn<'a> {
    /// Telegram user id
    pub user_id: i64,
    /// Logical model to ask
    pub model: &'a str,
    /// New user message
    pub text: &'a str,
    /// System message used outside instruction mode
    pub system_message: &'a str,
}

/// How a turn ended
#[derive(Debug)]
pub enum TurnResult {
    /// A stream was opened and presented
    Streamed(StreamOutcome),
    /// No stream could be opened
    Unavailable(RouteError),
    /// Cancelled before a stream was opened; only the user message was stored
    Skipped,
}

/// Messages sent upstream for one turn.
///
/// The custom instruction replaces the system message while instruction mode
/// is on. Stored context follows only when context mode is on.
#[must_use]
pub fn build_messages(
    profile: &UserProfile,
    context: Vec<ChatMessage>,
    system_message: &str,
    text: &str,
) -> Vec<ChatMessage> {
    let instruction = profile
        .instruction
        .as_deref()
        .filter(|s| profile.instruction_mode_on && !s.trim().is_empty());

    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(ChatMessage::system(instruction.unwrap_or(system_message)));
    if profile.context_mode_on {
        messages.extend(context);
    }
    messages.push(ChatMessage::user(text));
    messages
}

/// Model to use for `profile`: the selected one, else `default`, else the first listed.
///
/// # Errors
///
/// Returns the backend error if the model list is needed and cannot be fetched.
pub async fn resolve_model<B>(
    backend: &B,
    profile: &UserProfile,
    default: Option<&str>,
) -> Result<Option<String>, RouteError>
where
    B: ChatBackend + ?Sized,
{
    if let Some(model) = profile.selected_model.as_deref() {
        return Ok(Some(model.to_string()));
    }
    if let Some(model) = default.filter(|m| !m.trim().is_empty()) {
        return Ok(Some(model.to_string()));
    }
    Ok(backend
        .list_models()
        .await?
        .into_iter()
        .next()
        .map(|listing| listing.name))
}

/// Run one turn.
///
/// The user message is stored before generation starts, even when `cancel`
/// already fired and no stream is opened. The answer, thinking
/// excluded, is stored whenever any answer text arrived, including after an
/// interruption or cancellation.
///
/// # Errors
///
/// Returns an error only for storage failures.
pub async fn run_turn<St, B, S>(
    storage: &St,
    backend: &B,
    presenter: &Presenter<S>,
    turn: ChatTurn<'_>,
    cancel: &CancellationToken,
) -> Result<TurnResult>
where
    St: StorageProvider + ?Sized,
    B: ChatBackend + ?Sized,
    S: MessageSink,
{
    let ChatTurn {
        user_id,
        model,
        text,
        system_message,
    } = turn;

    let profile = storage.get_profile(user_id).await?;
    let context = if profile.context_mode_on {
        storage.get_context_messages(user_id).await?
    } else {
        Vec::new()
    };
    let messages = build_messages(&profile, context, system_message, text);

    info!(
        user_id,
        model,
        messages = messages.len(),
        "Starting generation: '{}'",
        truncate_str(text, 100)
    );
    storage
        .add_message(user_id, text.to_string(), true)
        .await?;

    if cancel.is_cancelled() {
        info!(user_id, model, "Generation cancelled before it started");
        return Ok(TurnResult::Skipped);
    }

    let stream = match backend.stream_chat(model, &messages).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(user_id, model, error = %e, "Generation could not start");
            if let Err(notify_error) = presenter.notify(&route_error_notice(&e)).await {
                warn!(user_id, error = %notify_error, "Failed to deliver error notice");
            }
            return Ok(TurnResult::Unavailable(e));
        }
    };

    let outcome = present_stream(stream, &SegmentReassembler::new(), presenter, cancel).await;
    info!(
        user_id,
        model,
        end = ?outcome.end,
        answer_chars = outcome.answer.chars().count(),
        "Generation finished"
    );

    if !outcome.answer.is_empty() {
        storage
            .add_message(user_id, outcome.answer.clone(), false)
            .await?;
    }

    Ok(TurnResult::Streamed(outcome))
}
