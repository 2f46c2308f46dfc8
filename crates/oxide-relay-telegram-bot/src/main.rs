use anyhow::Context;
use dotenvy::dotenv;
use oxide_relay_core::config::RelaySettings;
use oxide_relay_core::logging::{init_logging, RedactionPatterns, PRODUCTION_FILTER};
use oxide_relay_transport_telegram::config::{BotSettings, TelegramSettings};
use oxide_relay_transport_telegram::runner::run_bot;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    let relay_settings = RelaySettings::new().context("Failed to load relay configuration")?;
    let telegram_settings =
        TelegramSettings::new().context("Failed to load telegram configuration")?;

    // Secrets known up front are masked verbatim in addition to the regexes
    let secrets = [
        Some(telegram_settings.telegram_token.clone()),
        telegram_settings.relay_api_key.clone(),
        relay_settings.access_api_key.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();
    let patterns = Arc::new(RedactionPatterns::new(secrets).map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns, PRODUCTION_FILTER);

    info!("Starting Oxide Relay TG Bot...");
    info!("Configuration loaded successfully.");

    let settings = Arc::new(BotSettings::new(relay_settings, telegram_settings));
    run_bot(settings).await
}
