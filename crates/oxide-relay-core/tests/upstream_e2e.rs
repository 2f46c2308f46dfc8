//! End-to-end routing against fake OpenAI-compatible upstreams served by axum.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use futures_util::TryStreamExt;
use oxide_relay_core::llm::{
    ChatMessage, CompletionClient, Credential, Delta, LlmError, ModelRoute, OpenAiCompatClient,
    ProviderEntry, ProviderRegistry, RouteError, Router, RouterConfig,
};
use oxide_relay_core::stream::{SegmentReassembler, SegmentKind, StreamState};
use tokio::net::TcpListener;

type Seen = Arc<Mutex<Vec<String>>>;

const ANSWER_SSE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"plan\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\" it\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\", привет\"}}]}\n\n",
    "data: [DONE]\n\n",
);

async fn good(State(seen): State<Seen>, headers: HeaderMap) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if let Ok(mut log) = seen.lock() {
        log.push(format!("good {auth}"));
    }
    ([(header::CONTENT_TYPE, "text/event-stream")], ANSWER_SSE)
}

async fn broken(State(seen): State<Seen>) -> impl IntoResponse {
    if let Ok(mut log) = seen.lock() {
        log.push("broken".to_string());
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn limited() -> impl IntoResponse {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "7")],
        "slow down",
    )
}

async fn spawn_upstream(seen: Seen) -> std::io::Result<String> {
    let app = axum::Router::new()
        .route("/good/v1/chat/completions", post(good))
        .route("/broken/v1/chat/completions", post(broken))
        .route("/limited/v1/chat/completions", post(limited))
        .with_state(seen);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn entry(base: &str, provider: &str) -> ProviderEntry {
    ProviderEntry {
        provider_name: provider.to_string(),
        upstream_model_id: "upstream-model".to_string(),
        api_base: format!("{base}/{provider}/v1"),
        credential: Credential::new(format!("{provider}-secret")),
        reasoning_separator: None,
    }
}

fn router(entries: Vec<ProviderEntry>) -> Router {
    let registry = ProviderRegistry::from_routes(vec![ModelRoute {
        logical_model_name: "llama".to_string(),
        display_name: Some("Llama".to_string()),
        entries,
    }]);
    Router::new(
        Arc::new(registry),
        Arc::new(OpenAiCompatClient::new()),
        RouterConfig {
            attempt_timeout: Duration::from_secs(5),
            retry_budget: 3,
        },
    )
}

#[tokio::test]
async fn test_client_decodes_reasoning_and_content() -> Result<(), Box<dyn std::error::Error>> {
    let seen = Seen::default();
    let base = spawn_upstream(Arc::clone(&seen)).await?;

    let client = OpenAiCompatClient::new();
    let deltas: Vec<Delta> = client
        .open(&entry(&base, "good"), &[ChatMessage::user("hi")])
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        deltas,
        vec![
            Delta::Reasoning("plan".into()),
            Delta::Reasoning(" it".into()),
            Delta::Content("Hello".into()),
            Delta::Content(", привет".into()),
            Delta::EndOfStream,
        ]
    );
    let log = seen.lock().map(|l| l.clone()).unwrap_or_default();
    assert_eq!(log, vec!["good Bearer good-secret"]);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_is_classified() -> Result<(), Box<dyn std::error::Error>> {
    let base = spawn_upstream(Seen::default()).await?;
    let client = OpenAiCompatClient::new();

    let result = client
        .open(&entry(&base, "limited"), &[ChatMessage::user("hi")])
        .await;

    match result {
        Err(LlmError::RateLimit { wait_secs, .. }) => assert_eq!(wait_secs, Some(7)),
        Err(other) => panic!("expected rate limit, got {other}"),
        Ok(_) => panic!("expected rate limit, got a stream"),
    }
    Ok(())
}

#[tokio::test]
async fn test_router_falls_back_after_server_error() -> Result<(), Box<dyn std::error::Error>> {
    let seen = Seen::default();
    let base = spawn_upstream(Arc::clone(&seen)).await?;
    let router = router(vec![entry(&base, "broken"), entry(&base, "good")]);

    let text: String = router
        .route("llama", &[ChatMessage::user("hi")])
        .await?
        .try_collect()
        .await?;

    assert_eq!(text, "<reasoning>plan it</reasoning>Hello, привет");
    let log = seen.lock().map(|l| l.clone()).unwrap_or_default();
    assert_eq!(log, vec!["broken", "good Bearer good-secret"]);

    // The tagged text splits back into one thinking and one plain segment
    let reassembler = SegmentReassembler::new();
    let mut state = StreamState::new();
    let mut segments = reassembler.feed(&mut state, &text);
    segments.extend(reassembler.finish(&mut state));
    let kinds: Vec<(SegmentKind, String)> = segments
        .into_iter()
        .map(|segment| (segment.kind, segment.text))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (SegmentKind::Thinking, "plan it".to_string()),
            (SegmentKind::Plain, "Hello, привет".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_router_reports_exhaustion() -> Result<(), Box<dyn std::error::Error>> {
    let base = spawn_upstream(Seen::default()).await?;
    let router = router(vec![entry(&base, "broken"), entry(&base, "limited")]);

    match router.route("llama", &[ChatMessage::user("hi")]).await {
        Err(RouteError::AllProvidersExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(last, LlmError::RateLimit { .. }));
        }
        Err(other) => panic!("expected exhaustion, got {other}"),
        Ok(_) => panic!("expected exhaustion, got a stream"),
    }
    Ok(())
}
