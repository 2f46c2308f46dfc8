//! Provider registry
//!
//! Maps each logical model name to an ordered list of provider entries.
//! Built once at startup and shared read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::catalog::{parse_credentials, CatalogError, ProviderCatalog};
use super::RouteError;

/// API key with a redacted `Debug` representation
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw key.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw key for building the Authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if self.0.chars().count() > 8 {
            write!(f, "Credential(***{tail})")
        } else {
            f.write_str("Credential(***)")
        }
    }
}

/// One concrete way of serving a logical model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    /// Provider identifier, used in logs and listings
    pub provider_name: String,
    /// Model id sent upstream
    pub upstream_model_id: String,
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,
    /// Key for this entry
    pub credential: Credential,
    /// Inline reasoning terminator for models without a reasoning field
    pub reasoning_separator: Option<String>,
}

/// All entries for one logical model, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// Caller-facing name
    pub logical_model_name: String,
    /// Human-friendly name, if configured
    pub display_name: Option<String>,
    /// Never empty
    pub entries: Vec<ProviderEntry>,
}

/// Entry of the model listing returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelListing {
    /// Logical model name
    pub name: String,
    /// Human-friendly name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Distinct provider names backing the model, sorted
    pub providers: Vec<String>,
}

/// Immutable map from logical model names to routes
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    routes: BTreeMap<String, ModelRoute>,
}

impl ProviderRegistry {
    /// Build a registry from ready-made routes. Routes without entries are dropped.
    #[must_use]
    pub fn from_routes(routes: impl IntoIterator<Item = ModelRoute>) -> Self {
        let routes = routes
            .into_iter()
            .filter(|route| {
                if route.entries.is_empty() {
                    warn!(model = %route.logical_model_name, "Dropping model without provider entries");
                    false
                } else {
                    true
                }
            })
            .map(|route| (route.logical_model_name.clone(), route))
            .collect();
        Self { routes }
    }

    /// Build a registry from a catalog, reading keys from the process environment.
    ///
    /// # Errors
    ///
    /// See [`ProviderRegistry::from_catalog_with`].
    pub fn from_catalog(catalog: &ProviderCatalog) -> Result<Self, CatalogError> {
        Self::from_catalog_with(catalog, |name| std::env::var(name).ok())
    }

    /// Build a registry from a catalog with a custom key lookup.
    ///
    /// Every credential found in an entry's key variable becomes its own
    /// provider entry. Entries whose variable is unset or empty are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownProvider` for an entry without an
    /// endpoint and `CatalogError::InvalidCredentials` for an unparsable key list.
    pub fn from_catalog_with<F>(catalog: &ProviderCatalog, lookup: F) -> Result<Self, CatalogError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut routes: BTreeMap<String, ModelRoute> = BTreeMap::new();

        for item in &catalog.entries {
            let api_base = item.resolved_api_base()?;
            let raw = lookup(&item.api_key_env).unwrap_or_default();
            let keys =
                parse_credentials(&raw).map_err(|reason| CatalogError::InvalidCredentials {
                    env: item.api_key_env.clone(),
                    reason,
                })?;

            if keys.is_empty() {
                warn!(
                    model = %item.model_name,
                    provider = %item.provider,
                    env = %item.api_key_env,
                    "No credentials configured, skipping catalog entry"
                );
                continue;
            }

            let route = routes
                .entry(item.model_name.clone())
                .or_insert_with(|| ModelRoute {
                    logical_model_name: item.model_name.clone(),
                    display_name: None,
                    entries: Vec::new(),
                });
            if route.display_name.is_none() {
                route.display_name.clone_from(&item.display_name);
            }
            route.entries.extend(keys.into_iter().map(|key| ProviderEntry {
                provider_name: item.provider.clone(),
                upstream_model_id: item.upstream_model.clone(),
                api_base: api_base.trim_end_matches('/').to_string(),
                credential: Credential::new(key),
                reasoning_separator: item.reasoning_separator.clone(),
            }));
        }

        let registry = Self::from_routes(routes.into_values());
        info!(
            models = registry.routes.len(),
            entries = registry.routes.values().map(|r| r.entries.len()).sum::<usize>(),
            "Provider registry built"
        );
        Ok(registry)
    }

    /// Ordered provider entries for a logical model.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::UnknownModel` if the name is not registered.
    pub fn resolve(&self, logical_model_name: &str) -> Result<&[ProviderEntry], RouteError> {
        self.routes
            .get(logical_model_name)
            .map(|route| route.entries.as_slice())
            .ok_or_else(|| RouteError::UnknownModel(logical_model_name.to_string()))
    }

    /// Whether the model name is registered.
    #[must_use]
    pub fn contains(&self, logical_model_name: &str) -> bool {
        self.routes.contains_key(logical_model_name)
    }

    /// Listing of every model with the providers that back it.
    #[must_use]
    pub fn available_models(&self) -> Vec<ModelListing> {
        self.routes
            .values()
            .map(|route| {
                let mut providers: Vec<String> = route
                    .entries
                    .iter()
                    .map(|entry| entry.provider_name.clone())
                    .collect();
                providers.sort();
                providers.dedup();
                ModelListing {
                    name: route.logical_model_name.clone(),
                    display_name: route.display_name.clone(),
                    providers,
                }
            })
            .collect()
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::catalog::CatalogEntry;
    use std::collections::HashMap;

    fn entry(model: &str, provider: &str, env: &str) -> CatalogEntry {
        CatalogEntry {
            model_name: model.to_string(),
            provider: provider.to_string(),
            upstream_model: format!("{provider}/{model}"),
            api_key_env: env.to_string(),
            api_base: None,
            display_name: None,
            reasoning_separator: None,
        }
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_credentials_expand_in_catalog_order() -> Result<(), Box<dyn std::error::Error>> {
        let catalog = ProviderCatalog {
            entries: vec![
                entry("llama", "openrouter", "OR_KEYS"),
                entry("llama", "groq", "GROQ_KEYS"),
            ],
        };
        let vars = env(&[("OR_KEYS", r#"["a1","a2"]"#), ("GROQ_KEYS", "g1")]);
        let registry = ProviderRegistry::from_catalog_with(&catalog, |k| vars.get(k).cloned())?;

        let entries = registry.resolve("llama")?;
        let keys: Vec<&str> = entries.iter().map(|e| e.credential.expose()).collect();
        assert_eq!(keys, vec!["a1", "a2", "g1"]);
        assert_eq!(entries[2].api_base, "https://api.groq.com/openai/v1");
        Ok(())
    }

    #[test]
    fn test_models_without_keys_are_not_registered() -> Result<(), CatalogError> {
        let catalog = ProviderCatalog {
            entries: vec![
                entry("llama", "openrouter", "OR_KEYS"),
                entry("qwen", "groq", "MISSING"),
            ],
        };
        let vars = env(&[("OR_KEYS", "k")]);
        let registry = ProviderRegistry::from_catalog_with(&catalog, |k| vars.get(k).cloned())?;

        assert!(registry.contains("llama"));
        assert!(!registry.contains("qwen"));
        assert!(matches!(
            registry.resolve("qwen"),
            Err(RouteError::UnknownModel(name)) if name == "qwen"
        ));
        Ok(())
    }

    #[test]
    fn test_available_models_groups_providers() -> Result<(), CatalogError> {
        let mut first = entry("llama", "openrouter", "K");
        first.display_name = Some("Llama 4 Maverick".to_string());
        let catalog = ProviderCatalog {
            entries: vec![
                entry("qwen", "groq", "K"),
                first,
                entry("llama", "groq", "K"),
                entry("llama", "openrouter", "K"),
            ],
        };
        let vars = env(&[("K", "x,y")]);
        let registry = ProviderRegistry::from_catalog_with(&catalog, |k| vars.get(k).cloned())?;

        let listing = registry.available_models();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "llama");
        assert_eq!(listing[0].display_name.as_deref(), Some("Llama 4 Maverick"));
        assert_eq!(listing[0].providers, vec!["groq", "openrouter"]);
        assert_eq!(listing[1].name, "qwen");
        Ok(())
    }

    #[test]
    fn test_credential_debug_is_masked() {
        let long = Credential::new("sk-abcdefghijklmnop");
        assert_eq!(format!("{long:?}"), "Credential(***mnop)");
        let short = Credential::new("abc");
        assert_eq!(format!("{short:?}"), "Credential(***)");
    }

    #[test]
    fn test_empty_routes_are_dropped() {
        let registry = ProviderRegistry::from_routes(vec![ModelRoute {
            logical_model_name: "ghost".to_string(),
            display_name: None,
            entries: Vec::new(),
        }]);
        assert!(registry.is_empty());
    }
}
