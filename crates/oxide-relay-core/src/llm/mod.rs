//! LLM registry, routing and streaming
//!
//! Resolves logical model names to provider entries, opens streaming
//! completions against OpenAI-compatible upstreams and falls back across
//! entries when an attempt fails before its first byte.

/// Provider catalog loading
pub mod catalog;
mod common;
mod http_utils;
/// OpenAI-compatible streaming client
pub mod openai_compat;
/// Provider registry
pub mod registry;
/// Client for a remote relay proxy
pub mod remote;
/// Router with pre-first-byte fallback
pub mod router;
/// Reasoning field to sentinel translation
pub mod tagger;

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use catalog::{CatalogEntry, CatalogError, ProviderCatalog};
pub use openai_compat::OpenAiCompatClient;
pub use registry::{Credential, ModelListing, ModelRoute, ProviderEntry, ProviderRegistry};
pub use remote::{RemoteRelay, Utf8ChunkDecoder};
pub use router::{RouteError, Router, RouterConfig};
pub use tagger::ReasoningTagger;

/// Errors that can occur while talking to an upstream provider
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("Rate limit exceeded: {message} (wait: {wait_secs:?}s)")]
    RateLimit {
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
        /// Error message from the server
        message: String,
    },
    /// No first delta within the attempt timeout
    #[error("No response within {0}s")]
    Timeout(u64),
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// End user
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a wire name; anything outside the three known roles is rejected.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A message in an LLM conversation. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: Role,
    /// Text content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new system message
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }

    /// Create a new user message
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    /// Create a new assistant message
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// One incremental piece of a streaming completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Answer text
    Content(String),
    /// Text from a structurally separate reasoning field
    Reasoning(String),
    /// Upstream finished normally
    EndOfStream,
}

/// Deltas of one upstream attempt, in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, LlmError>> + Send>>;

/// Sentinel-tagged text chunks handed to callers.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, RouteError>> + Send>>;

/// Opens a streaming completion against a single provider entry
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open the stream. Failing here means nothing was received yet.
    async fn open(
        &self,
        entry: &ProviderEntry,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream, LlmError>;
}

/// Anything that turns a logical model and a conversation into tagged text
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start generating a reply.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextStream, RouteError>;

    /// Logical models this backend can serve.
    async fn list_models(&self) -> Result<Vec<ModelListing>, RouteError>;
}
