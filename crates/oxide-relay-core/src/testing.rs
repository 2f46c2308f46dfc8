//! Testing helpers and mock utilities.
//!
//! Canned registries, scripted streams and a recording message sink.

use std::sync::{Arc, Mutex};

use futures_util::stream;

use crate::llm::{
    Credential, Delta, DeltaStream, LlmError, ModelRoute, ProviderEntry, ProviderRegistry,
    RouteError, TextStream,
};
use crate::stream::{EditOutcome, MessageHandle, MockMessageSink, Outbound, SinkError};

/// Shared log of sink calls, one formatted line per call.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Entry for `provider` pointing at an unroutable host.
#[must_use]
pub fn provider_entry(provider: &str) -> ProviderEntry {
    ProviderEntry {
        provider_name: provider.to_string(),
        upstream_model_id: format!("{provider}-model"),
        api_base: format!("http://{provider}.invalid/v1"),
        credential: Credential::new(format!("{provider}-key")),
        reasoning_separator: None,
    }
}

/// Registry with the single logical model `llama`, served by `providers` in order.
#[must_use]
pub fn single_model_registry(providers: &[&str]) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::from_routes(vec![ModelRoute {
        logical_model_name: "llama".to_string(),
        display_name: None,
        entries: providers.iter().map(|p| provider_entry(p)).collect(),
    }]))
}

/// Delta stream yielding `items` and then ending.
#[must_use]
pub fn delta_stream(items: Vec<Result<Delta, LlmError>>) -> DeltaStream {
    Box::pin(stream::iter(items))
}

/// Text stream yielding `items` and then ending.
#[must_use]
pub fn text_stream(items: Vec<Result<&'static str, RouteError>>) -> TextStream {
    Box::pin(stream::iter(
        items.into_iter().map(|item| item.map(ToString::to_string)),
    ))
}

/// Sink that accepts everything and records each call into `calls`.
///
/// Sends get increasing handles starting at 1. Lines look like
/// `send#1 Plain Partial text` and `edit#1 Plain Final text`.
#[must_use]
pub fn recording_sink(calls: &CallLog) -> MockMessageSink {
    let mut sink = MockMessageSink::new();

    let sends = Arc::clone(calls);
    let next_id = Arc::new(Mutex::new(0_i64));
    sink.expect_send().returning(move |msg: &Outbound| {
        let mut id = next_id
            .lock()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        *id += 1;
        if let Ok(mut log) = sends.lock() {
            log.push(format!("send#{} {:?} {:?} {}", *id, msg.kind, msg.stage, msg.text));
        }
        Ok(MessageHandle(*id))
    });

    let edits = Arc::clone(calls);
    sink.expect_edit().returning(move |handle, msg| {
        if let Ok(mut log) = edits.lock() {
            log.push(format!(
                "edit#{} {:?} {:?} {}",
                handle.0, msg.kind, msg.stage, msg.text
            ));
        }
        Ok(EditOutcome::Edited)
    });

    sink
}

/// Snapshot of a [`CallLog`].
#[must_use]
pub fn recorded(calls: &CallLog) -> Vec<String> {
    calls.lock().map(|log| log.clone()).unwrap_or_default()
}
