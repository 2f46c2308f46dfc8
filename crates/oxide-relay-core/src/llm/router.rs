//! Router with pre-first-byte fallback
//!
//! Entries of a model are attempted strictly in order. An attempt counts as
//! failed only until its first delta arrives; after that the stream belongs
//! to the caller and errors end it instead of triggering another attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::catalog::{CatalogError, ProviderCatalog};
use super::openai_compat::OpenAiCompatClient;
use super::registry::{ModelListing, ProviderEntry, ProviderRegistry};
use super::tagger::ReasoningTagger;
use super::{ChatBackend, ChatMessage, CompletionClient, Delta, DeltaStream, LlmError, TextStream};
use crate::config::{RelaySettings, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_RETRY_BUDGET};

/// Errors surfaced by [`Router::route`] and other chat backends
#[derive(Debug, Error)]
pub enum RouteError {
    /// Request shape rejected before any provider was contacted
    #[error("Invalid request: {0}")]
    Validation(String),
    /// Logical model is not registered
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    /// Every attempt failed before producing data
    #[error("All providers exhausted for {model} after {attempts} attempt(s): {last}")]
    AllProvidersExhausted {
        /// Requested logical model
        model: String,
        /// Number of entries attempted
        attempts: usize,
        /// Error of the final attempt
        #[source]
        last: LlmError,
    },
    /// Upstream failed after output was already forwarded
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(#[source] LlmError),
    /// Remote relay failed in a way that maps to no other variant
    #[error("Relay error: {0}")]
    Relay(#[source] LlmError),
}

/// Fallback policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Time an attempt has to deliver its first delta
    pub attempt_timeout: Duration,
    /// Maximum entries attempted per request; zero is treated as one
    pub retry_budget: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

/// Routes logical model requests across provider entries
#[derive(Clone)]
pub struct Router {
    registry: Arc<ProviderRegistry>,
    client: Arc<dyn CompletionClient>,
    config: RouterConfig,
}

impl Router {
    /// Create a router over a read-only registry.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        client: Arc<dyn CompletionClient>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// Load the provider catalog named in `settings` and route through
    /// the OpenAI-compatible client.
    ///
    /// # Errors
    ///
    /// Returns a `CatalogError` if the catalog cannot be read or resolved.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, CatalogError> {
        let catalog = ProviderCatalog::load(&settings.providers_file)?;
        let registry = ProviderRegistry::from_catalog(&catalog)?;
        if registry.is_empty() {
            warn!(file = %settings.providers_file, "No model has usable credentials");
        }
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(OpenAiCompatClient::new()),
            settings.router_config(),
        ))
    }

    /// Registry this router resolves against.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Open a sentinel-tagged text stream for `model`.
    ///
    /// # Errors
    ///
    /// - `RouteError::Validation` for an empty conversation
    /// - `RouteError::UnknownModel` if the model is not registered
    /// - `RouteError::AllProvidersExhausted` if no attempt produced data
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn route(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextStream, RouteError> {
        if messages.is_empty() {
            return Err(RouteError::Validation(
                "messages must be a non-empty list".to_string(),
            ));
        }
        let entries = self.registry.resolve(model)?;
        let budget = self.config.retry_budget.max(1);

        let mut attempts = 0;
        let mut last_error = None;
        for entry in entries.iter().take(budget) {
            attempts += 1;
            let outcome =
                tokio::time::timeout(self.config.attempt_timeout, self.open_first(entry, messages))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LlmError::Timeout(self.config.attempt_timeout.as_secs()))
                    });

            match outcome {
                Ok((first, rest)) => {
                    info!(
                        model = %model,
                        provider = %entry.provider_name,
                        upstream = %entry.upstream_model_id,
                        attempt = attempts,
                        "Provider attempt streaming"
                    );
                    return Ok(tagged_stream(model, entry, first, rest));
                }
                Err(e) => {
                    warn!(
                        model = %model,
                        provider = %entry.provider_name,
                        upstream = %entry.upstream_model_id,
                        attempt = attempts,
                        error = %e,
                        "Provider attempt failed before first byte"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(RouteError::AllProvidersExhausted {
            model: model.to_string(),
            attempts,
            last: last_error
                .unwrap_or_else(|| LlmError::MissingConfig(format!("no entries for {model}"))),
        })
    }

    async fn open_first(
        &self,
        entry: &ProviderEntry,
        messages: &[ChatMessage],
    ) -> Result<(Delta, DeltaStream), LlmError> {
        let mut deltas = self.client.open(entry, messages).await?;
        match deltas.next().await {
            Some(Ok(first)) => Ok((first, deltas)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::ApiError(
                "stream closed before first delta".to_string(),
            )),
        }
    }
}

/// Chain the peeked delta back in front and translate through a fresh tagger.
fn tagged_stream(model: &str, entry: &ProviderEntry, first: Delta, rest: DeltaStream) -> TextStream {
    let model = model.to_string();
    let provider = entry.provider_name.clone();
    let tagger = Some(ReasoningTagger::for_entry(entry));

    let chunks = stream::once(future::ready(Ok(first)))
        .chain(rest)
        .scan(tagger, move |slot, item| {
            let Some(tagger) = slot.as_mut() else {
                return future::ready(None);
            };
            let (chunks, done): (Vec<Result<String, RouteError>>, bool) = match item {
                Ok(Delta::EndOfStream) => {
                    debug!(model = %model, provider = %provider, "Upstream stream completed");
                    (tagger.push(Delta::EndOfStream).into_iter().map(Ok).collect(), true)
                }
                Ok(delta) => (tagger.push(delta).into_iter().map(Ok).collect(), false),
                Err(e) => {
                    warn!(model = %model, provider = %provider, error = %e, "Upstream stream interrupted");
                    (vec![Err(RouteError::StreamInterrupted(e))], true)
                }
            };
            if done {
                *slot = None;
            }
            future::ready(Some(chunks))
        })
        .flat_map(stream::iter)
        .filter(|item| future::ready(!matches!(item, Ok(text) if text.is_empty())));

    Box::pin(chunks)
}

#[async_trait]
impl ChatBackend for Router {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TextStream, RouteError> {
        self.route(model, messages).await
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, RouteError> {
        Ok(self.registry.available_models())
    }
}
