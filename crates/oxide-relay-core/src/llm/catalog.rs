//! Provider catalog
//!
//! A YAML list of `(logical model, provider, upstream model, key variable)`
//! entries. Key variables may hold several credentials, each of which turns
//! into its own provider entry so the router can rotate across keys.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::split_list;

/// Errors raised while loading the provider catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("Failed to read provider catalog {path}: {source}")]
    Read {
        /// Catalog path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// Catalog file is not valid YAML for the expected shape
    #[error("Invalid provider catalog {path}: {source}")]
    Yaml {
        /// Catalog path
        path: PathBuf,
        /// YAML parsing error
        source: serde_yaml::Error,
    },
    /// Provider has no known endpoint and none was configured
    #[error("No api_base known for provider '{provider}' (model {model_name})")]
    UnknownProvider {
        /// Provider name from the entry
        provider: String,
        /// Logical model the entry belongs to
        model_name: String,
    },
    /// Key variable is set but cannot be parsed
    #[error("Invalid credential list in {env}: {reason}")]
    InvalidCredentials {
        /// Environment variable name
        env: String,
        /// Parse failure
        reason: String,
    },
}

/// One catalog line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Caller-facing model name
    pub model_name: String,
    /// Provider identifier (openai, groq, openrouter, ...)
    pub provider: String,
    /// Model id sent upstream
    pub upstream_model: String,
    /// Environment variable holding one or more API keys
    pub api_key_env: String,
    /// Endpoint override; known providers have a default
    #[serde(default)]
    pub api_base: Option<String>,
    /// Human-friendly name for menus
    #[serde(default)]
    pub display_name: Option<String>,
    /// Marker ending inline reasoning for models without a reasoning field
    #[serde(default)]
    pub reasoning_separator: Option<String>,
}

impl CatalogEntry {
    /// Endpoint for this entry.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownProvider` if neither an override nor a
    /// default is available.
    pub fn resolved_api_base(&self) -> Result<String, CatalogError> {
        self.api_base
            .clone()
            .or_else(|| default_api_base(&self.provider).map(ToString::to_string))
            .ok_or_else(|| CatalogError::UnknownProvider {
                provider: self.provider.clone(),
                model_name: self.model_name.clone(),
            })
    }
}

/// The whole catalog, in priority order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCatalog {
    /// Entries; order sets fallback priority within a logical model
    pub entries: Vec<CatalogEntry>,
}

impl ProviderCatalog {
    /// Parse a catalog from YAML text.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if the text does not describe a list of entries.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Read and parse the catalog file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Read` or `CatalogError::Yaml`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| CatalogError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Endpoint of a well-known OpenAI-compatible provider.
#[must_use]
pub fn default_api_base(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "openai" => Some("https://api.openai.com/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "gemini" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        _ => None,
    }
}

/// Expand a key variable's value into individual credentials.
///
/// Accepts a JSON array of strings or a list delimited by `,`, `;` or
/// whitespace.
///
/// # Errors
///
/// Returns the parse failure if the value looks like JSON but is not an
/// array of strings.
pub fn parse_credentials(raw: &str) -> Result<Vec<String>, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let keys: Vec<String> = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        return Ok(keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect());
    }
    Ok(split_list(trimmed).map(ToString::to_string).collect())
}
