//! Telegram transport settings.

use config::ConfigError;
use oxide_relay_core::config::{split_list, RelaySettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// System message used when the user has no instruction of their own.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
    /// Delimited list of user IDs allowed to chat.
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,
    /// Base URL of a relay proxy. Without it the bot routes in-process.
    pub relay_url: Option<String>,
    /// Key presented to the relay proxy.
    pub relay_api_key: Option<String>,
    /// Model for users who never picked one.
    pub default_model: Option<String>,
    /// System message for users without instruction mode.
    pub system_message: Option<String>,
}

/// Combined settings used by the Telegram transport layer.
#[derive(Clone)]
pub struct BotSettings {
    /// Router settings, used when no relay URL is configured.
    pub relay: Arc<RelaySettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(relay: RelaySettings, telegram: TelegramSettings) -> Self {
        Self {
            relay: Arc::new(relay),
            telegram: Arc::new(telegram),
        }
    }
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        oxide_relay_core::config::build_config()?.try_deserialize()
    }

    /// Returns a set of allowed user IDs.
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_deref()
            .map(|s| split_list(s).filter_map(|id| id.parse::<i64>().ok()).collect())
            .unwrap_or_default()
    }

    /// System message for conversations without a custom instruction.
    #[must_use]
    pub fn system_message(&self) -> &str {
        self.system_message
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
    }

    /// Relay URL, if a non-empty one is configured.
    #[must_use]
    pub fn relay_url(&self) -> Option<&str> {
        self.relay_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Cooldown period (seconds) between "Access Denied" messages for same user.
/// Default: 20 minutes.
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Time-to-live (seconds) for cache entries.
/// Default: 2 hours.
pub const UNAUTHORIZED_CACHE_TTL_SECS: u64 = 7200;
/// Maximum cache capacity (number of entries).
pub const UNAUTHORIZED_CACHE_MAX_SIZE: u64 = 10_000;
/// Interval between sweeps of the media group map.
pub const MEDIA_GROUP_SWEEP_SECS: u64 = 30;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Get unauthorized cooldown from env or default.
///
/// Environment variable: `UNAUTHORIZED_COOLDOWN_SECS`.
#[must_use]
pub fn get_unauthorized_cooldown() -> u64 {
    env_u64("UNAUTHORIZED_COOLDOWN_SECS", UNAUTHORIZED_COOLDOWN_SECS)
}

/// Get unauthorized cache TTL from env or default.
///
/// Environment variable: `UNAUTHORIZED_CACHE_TTL_SECS`.
#[must_use]
pub fn get_unauthorized_cache_ttl() -> u64 {
    env_u64("UNAUTHORIZED_CACHE_TTL_SECS", UNAUTHORIZED_CACHE_TTL_SECS)
}

/// Get unauthorized cache max size from env or default.
///
/// Environment variable: `UNAUTHORIZED_CACHE_MAX_SIZE`.
#[must_use]
pub fn get_unauthorized_cache_max_size() -> u64 {
    env_u64("UNAUTHORIZED_CACHE_MAX_SIZE", UNAUTHORIZED_CACHE_MAX_SIZE)
}

/// Get the media group sweep interval from env or default.
///
/// Environment variable: `MEDIA_GROUP_SWEEP_SECS`.
#[must_use]
pub fn get_media_group_sweep_secs() -> u64 {
    env_u64("MEDIA_GROUP_SWEEP_SECS", MEDIA_GROUP_SWEEP_SECS).max(1)
}
