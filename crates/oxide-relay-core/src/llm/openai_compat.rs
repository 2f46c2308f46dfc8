//! OpenAI-compatible streaming client
//!
//! Every provider in the catalog speaks the `/chat/completions` SSE dialect,
//! so a single client covers them all. The entry decides endpoint, model and key.

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{stream, Stream, StreamExt};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::common::build_stream_request;
use super::http_utils::{create_http_client, error_from_response};
use super::{ChatMessage, CompletionClient, Delta, DeltaStream, LlmError, ProviderEntry};

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    // OpenRouter names the field differently
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Streaming client for OpenAI-compatible chat completion endpoints
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http_client: HttpClient,
}

impl Default for OpenAiCompatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiCompatClient {
    /// Create a client with the standard connect timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_http_client(create_http_client())
    }

    /// Create a client around an existing `reqwest` client.
    #[must_use]
    pub const fn with_http_client(http_client: HttpClient) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    #[instrument(skip(self, entry, messages), fields(provider = %entry.provider_name, model = %entry.upstream_model_id))]
    async fn open(
        &self,
        entry: &ProviderEntry,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream, LlmError> {
        let url = format!("{}/chat/completions", entry.api_base);
        let body = build_stream_request(&entry.upstream_model_id, messages)?;

        let response = self
            .http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", entry.credential.expose()),
            )
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(&entry.provider_name, response).await);
        }

        debug!(status = %response.status(), "Upstream stream opened");
        Ok(deltas_from_events(response.bytes_stream().eventsource()))
    }
}

struct SseState<S> {
    events: S,
    pending: VecDeque<Result<Delta, LlmError>>,
    finished: bool,
}

/// Turn a server-sent event stream into deltas.
///
/// Ends with `EndOfStream` on `[DONE]` or a clean close. After the first
/// error no further items are produced.
pub(crate) fn deltas_from_events<S, E>(events: S) -> DeltaStream
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        events,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.events.next().await {
                None => {
                    st.finished = true;
                    st.pending.push_back(Ok(Delta::EndOfStream));
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(LlmError::NetworkError(format!("SSE stream error: {e}"))));
                }
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        st.finished = true;
                        st.pending.push_back(Ok(Delta::EndOfStream));
                        continue;
                    }
                    match parse_chunk(data) {
                        Ok(deltas) => st.pending.extend(deltas.into_iter().map(Ok)),
                        Err(e) => {
                            st.finished = true;
                            st.pending.push_back(Err(e));
                        }
                    }
                }
            }
        }
    }))
}

fn parse_chunk(data: &str) -> Result<Vec<Delta>, LlmError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::JsonError(format!("Failed to parse event data: {e}")))?;

    if let Some(err) = chunk.error {
        let code = err.code.map(|c| format!(" ({c})")).unwrap_or_default();
        return Err(LlmError::ApiError(format!(
            "{}{code}",
            err.message.unwrap_or_else(|| "upstream error".to_string())
        )));
    }

    let mut deltas = Vec::with_capacity(2);
    if let Some(choice) = chunk.choices.into_iter().next() {
        let delta = choice.delta;
        if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
            if !reasoning.is_empty() {
                deltas.push(Delta::Reasoning(reasoning));
            }
        }
        if let Some(content) = delta.content {
            if !content.is_empty() {
                deltas.push(Delta::Content(content));
            }
        }
    }
    Ok(deltas)
}
