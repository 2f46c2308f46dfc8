//! Configuration and settings management
//!
//! Layered settings (files, prefixed and plain environment variables) plus
//! tunables that read an environment override and fall back to a constant.

use crate::llm::RouterConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default location of the provider catalog.
pub const DEFAULT_PROVIDERS_FILE: &str = "config/providers.yaml";
/// Default listen address of the HTTP proxy.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5050";
/// Seconds an attempt may take to deliver its first delta.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;
/// Provider entries tried per logical request.
pub const DEFAULT_RETRY_BUDGET: usize = 3;

/// TCP connect timeout for upstream HTTP clients.
pub const LLM_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Longest text a single outbound message may carry.
/// Telegram's hard ceiling is 4096; the margin leaves room for markup.
pub const PRESENTER_MAX_MESSAGE_CHARS: usize = 4000;
/// Minimum delay between two time-driven edits of the same message.
pub const PRESENTER_MIN_EDIT_INTERVAL_MS: u64 = 1000;
/// How long a media group stays marked as processed.
pub const MEDIA_GROUP_TTL_SECS: u64 = 60;
/// Upper bound on remembered media groups.
pub const MEDIA_GROUP_MAX_ENTRIES: usize = 1024;

/// Transport API retry: initial backoff.
pub const TRANSPORT_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Transport API retry: backoff ceiling.
pub const TRANSPORT_API_MAX_BACKOFF_MS: u64 = 4000;
/// Transport API retry: attempts after the first failure.
pub const TRANSPORT_API_MAX_RETRIES: usize = 3;

/// Build the layered configuration source shared by all settings structs.
///
/// Order (later wins): `config/default`, `config/{RUN_MODE}`, `config/local`,
/// `APP__*` variables, then plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE maps to snake_case keys; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

/// Router and proxy settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaySettings {
    /// Path to the YAML provider catalog
    #[serde(default = "default_providers_file")]
    pub providers_file: String,
    /// Shared secret callers must present
    pub access_api_key: Option<String>,
    /// Per-attempt timeout until the first delta, in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Maximum provider entries attempted per request
    #[serde(default = "default_retry_budget")]
    pub retry_budget: usize,
    /// Proxy listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_providers_file() -> String {
    DEFAULT_PROVIDERS_FILE.to_string()
}

const fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}

const fn default_retry_budget() -> usize {
    DEFAULT_RETRY_BUDGET
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            providers_file: default_providers_file(),
            access_api_key: None,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            bind_addr: default_bind_addr(),
        }
    }
}

impl RelaySettings {
    /// Load settings from files and environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading or deserialization fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(build_config()?)
    }

    /// Deserialize settings out of an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value has the wrong type.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }

    /// Router policy derived from these settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            retry_budget: self.retry_budget,
        }
    }
}

/// Split a delimited list on `,`, `;` and whitespace, skipping empty tokens.
pub fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Get the upstream connect timeout in seconds.
///
/// Environment variable: `LLM_CONNECT_TIMEOUT_SECS`.
#[must_use]
pub fn get_llm_connect_timeout_secs() -> u64 {
    env_or("LLM_CONNECT_TIMEOUT_SECS", LLM_CONNECT_TIMEOUT_SECS)
}

/// Get the presenter's maximum message length in characters.
///
/// Environment variable: `PRESENTER_MAX_MESSAGE_CHARS`.
#[must_use]
pub fn get_presenter_max_message_chars() -> usize {
    env_or("PRESENTER_MAX_MESSAGE_CHARS", PRESENTER_MAX_MESSAGE_CHARS)
}

/// Get the presenter's minimum interval between edits.
///
/// Environment variable: `PRESENTER_MIN_EDIT_INTERVAL_MS`.
#[must_use]
pub fn get_presenter_min_edit_interval() -> Duration {
    Duration::from_millis(env_or(
        "PRESENTER_MIN_EDIT_INTERVAL_MS",
        PRESENTER_MIN_EDIT_INTERVAL_MS,
    ))
}

/// Get the media group dedup TTL.
///
/// Environment variable: `MEDIA_GROUP_TTL_SECS`.
#[must_use]
pub fn get_media_group_ttl() -> Duration {
    Duration::from_secs(env_or("MEDIA_GROUP_TTL_SECS", MEDIA_GROUP_TTL_SECS))
}

/// Get the media group dedup capacity.
///
/// Environment variable: `MEDIA_GROUP_MAX_ENTRIES`.
#[must_use]
pub fn get_media_group_max_entries() -> usize {
    env_or("MEDIA_GROUP_MAX_ENTRIES", MEDIA_GROUP_MAX_ENTRIES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_parsing() {
        let tokens: Vec<&str> = split_list("333; 444, 555").collect();
        assert_eq!(tokens, vec!["333", "444", "555"]);

        let tokens: Vec<&str> = split_list("k1 k2\tk3").collect();
        assert_eq!(tokens, vec!["k1", "k2", "k3"]);

        assert_eq!(split_list(" ,; ").count(), 0);
    }

    #[test]
    fn test_defaults_apply_when_unset() -> Result<(), ConfigError> {
        let settings = RelaySettings::from_config(Config::builder().build()?)?;
        assert_eq!(settings.providers_file, DEFAULT_PROVIDERS_FILE);
        assert_eq!(settings.retry_budget, DEFAULT_RETRY_BUDGET);
        assert_eq!(settings.attempt_timeout_secs, DEFAULT_ATTEMPT_TIMEOUT_SECS);
        assert!(settings.access_api_key.is_none());
        Ok(())
    }

    #[test]
    fn test_overrides_are_picked_up() -> Result<(), ConfigError> {
        let config = Config::builder()
            .set_override("access_api_key", "secret")?
            .set_override("retry_budget", 5)?
            .set_override("attempt_timeout_secs", "3")?
            .build()?;
        let settings = RelaySettings::from_config(config)?;
        assert_eq!(settings.access_api_key.as_deref(), Some("secret"));

        let router = settings.router_config();
        assert_eq!(router.retry_budget, 5);
        assert_eq!(router.attempt_timeout, Duration::from_secs(3));
        Ok(())
    }
}
