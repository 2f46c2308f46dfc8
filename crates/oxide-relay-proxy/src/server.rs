//! axum application exposing the router over HTTP

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures_util::TryStreamExt;
use oxide_relay_core::llm::{ModelListing, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::error::ProxyError;
use crate::validation::validate_stream_request;

/// Shared request state
pub struct AppState {
    /// In-process router with its registry
    pub router: Router,
    /// Secret callers must present as `api_key`
    pub access_key: Option<String>,
}

impl AppState {
    /// Bundle a router with the expected key.
    #[must_use]
    pub const fn new(router: Router, access_key: Option<String>) -> Self {
        Self { router, access_key }
    }
}

/// Build the axum router with all routes registered.
pub fn app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/", get(liveness))
        .route("/v1/models", get(list_models))
        .route("/stream/", post(stream))
        .route("/stream", post(stream))
        .with_state(state)
}

/// Serve until `shutdown` resolves; in-flight responses are allowed to finish.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Relay proxy listening");
    }
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn liveness() -> &'static str {
    "Work"
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelListing>> {
    Json(state.router.registry().available_models())
}

#[instrument(skip_all)]
async fn stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, ProxyError> {
    let request = validate_stream_request(
        &body,
        state.access_key.as_deref(),
        state.router.registry(),
    )
    .inspect_err(|e| warn!(error = %e, "Rejected stream request"))?;

    let model = request.model;
    let text = state.router.route(&model, &request.messages).await?;

    // A body error aborts the chunked transfer, so the client sees truncation
    let body = text
        .inspect_err(move |e| warn!(model = %model, error = %e, "Stream aborted mid-response"))
        .map_err(|e| std::io::Error::other(e.to_string()));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}
