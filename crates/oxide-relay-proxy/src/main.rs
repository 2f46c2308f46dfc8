use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use oxide_relay_core::config::RelaySettings;
use oxide_relay_core::llm::Router;
use oxide_relay_core::logging::{init_logging, RedactionPatterns, PRODUCTION_FILTER};
use oxide_relay_proxy::{serve, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = RelaySettings::new().context("Failed to load relay configuration")?;

    let secrets = settings.access_api_key.iter().cloned().collect();
    let patterns = Arc::new(RedactionPatterns::new(secrets).map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns, PRODUCTION_FILTER);

    info!("Starting Oxide Relay proxy...");

    if settings.access_api_key.as_deref().map_or(true, str::is_empty) {
        error!("ACCESS_API_KEY is not set, every stream request will be rejected");
    }

    let router = Router::from_settings(&settings)
        .with_context(|| format!("Failed to load provider catalog {}", settings.providers_file))?;
    let state = Arc::new(AppState::new(router, settings.access_api_key.clone()));

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await?;

    info!("Relay proxy stopped");
    Ok(())
}
