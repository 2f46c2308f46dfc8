//! Client for a remote relay proxy
//!
//! Lets the bot run against a separately deployed proxy instead of an
//! in-process router. The proxy streams sentinel-tagged text as a chunked
//! `text/plain` body.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::http_utils::create_http_client;
use super::registry::ModelListing;
use super::{ChatBackend, ChatMessage, LlmError, RouteError, TextStream};
use crate::utils::truncate_str;

/// Incremental UTF-8 decoder that never splits a code point across chunks
#[derive(Debug, Default, Clone)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decode as much of the accumulated bytes as possible.
    ///
    /// An incomplete trailing sequence is kept for the next call; invalid
    /// bytes become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut consumed = 0;

        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = consumed + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + len;
                        }
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flush whatever is left, replacing a truncated sequence with U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    api_key: Option<&'a str>,
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize, Debug, Default)]
struct RelayErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    attempts: Option<usize>,
}

/// [`ChatBackend`] backed by a relay proxy over HTTP
#[derive(Debug, Clone)]
pub struct RemoteRelay {
    http_client: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteRelay {
    /// Create a client for the proxy at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http_client: create_http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn map_error_status(model: &str, response: reqwest::Response) -> RouteError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: RelayErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| RelayErrorBody {
            error: truncate_str(&text, 500),
            ..RelayErrorBody::default()
        });

        match status {
            StatusCode::BAD_REQUEST if body.kind.as_deref() == Some("unknown_model") => {
                RouteError::UnknownModel(model.to_string())
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => RouteError::Validation(body.error),
            StatusCode::BAD_GATEWAY => RouteError::AllProvidersExhausted {
                model: model.to_string(),
                attempts: body.attempts.unwrap_or_default(),
                last: LlmError::ApiError(body.error),
            },
            _ => RouteError::Relay(LlmError::ApiError(format!("{status} - {}", body.error))),
        }
    }
}

#[async_trait]
impl ChatBackend for RemoteRelay {
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextStream, RouteError> {
        let url = format!("{}/stream/", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&StreamRequest {
                api_key: self.api_key.as_deref(),
                model,
                messages,
            })
            .send()
            .await
            .map_err(|e| RouteError::Relay(LlmError::NetworkError(e.to_string())))?;

        if !response.status().is_success() {
            let err = Self::map_error_status(model, response).await;
            warn!(model = %model, error = %err, "Relay rejected request");
            return Err(err);
        }
        debug!(model = %model, "Relay stream opened");

        let bytes = Box::pin(response.bytes_stream());
        let chunks = stream::unfold(
            (bytes, Utf8ChunkDecoder::default(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.push(&chunk);
                            if !text.is_empty() {
                                return Some((Ok(text), (bytes, decoder, false)));
                            }
                        }
                        Some(Err(e)) => {
                            let err =
                                RouteError::StreamInterrupted(LlmError::NetworkError(e.to_string()));
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            let tail = decoder.finish();
                            if tail.is_empty() {
                                return None;
                            }
                            return Some((Ok(tail), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, RouteError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| RouteError::Relay(LlmError::NetworkError(e.to_string())))?;

        if !response.status().is_success() {
            return Err(RouteError::Relay(LlmError::ApiError(format!(
                "model listing failed: {}",
                response.status()
            ))));
        }

        response
            .json()
            .await
            .map_err(|e| RouteError::Relay(LlmError::JsonError(e.to_string())))
    }
}
