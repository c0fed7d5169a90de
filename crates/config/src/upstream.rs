//! Upstream completion-backend configuration.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::Deserialize;

/// A single configured upstream completion backend.
///
/// A model name advertised in `models` may carry an alias via the `alias:real_model` syntax;
/// see [`crate::LlmConfig`] for how the alias and plain-model maps are built from the full list
/// of services.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamServiceConfig {
    /// A unique, human-readable name for this upstream, surfaced in logs and `/v1/models`.
    pub name: String,
    /// Base URL of the upstream's OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    /// A trailing slash is stripped.
    pub base_url: String,
    /// Bearer API key sent to the upstream. An empty or absent key makes this service
    /// unusable for routing (it is filtered out of every candidate list).
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Model names this service accepts, each optionally carrying an `alias:real_model` prefix.
    #[serde(default)]
    pub models: Vec<String>,
    /// Per-service rename of a client-visible model name to the name actually sent upstream.
    /// Distinct from the alias mechanism: this always applies, regardless of which service is
    /// chosen by the router, whereas an alias is resolved before a service is even selected.
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Free-text description, surfaced only in `/v1/models` listings and logs.
    #[serde(default)]
    pub description: String,
    /// Whether this service is eligible as the fallback when a requested model resolves to
    /// no configured mapping.
    #[serde(default)]
    pub is_default: bool,
    /// Selection priority: higher values are tried first. Ties keep configuration order.
    #[serde(default)]
    pub priority: i32,
    /// Per-service override of whether the function-calling transformation pipeline runs at
    /// all for requests routed to this service. `None` inherits
    /// [`crate::FeaturesConfig::enable_function_calling`].
    #[serde(default)]
    pub inject_function_calling: Option<bool>,
    /// Render the injected tool-use prompt in its condensed, token-frugal form.
    #[serde(default)]
    pub optimize_prompt: bool,
}

impl UpstreamServiceConfig {
    /// Returns whether this service has a usable API key and can be selected for routing.
    pub fn is_usable(&self) -> bool {
        self.api_key.as_ref().is_some_and(|key| !secrecy::ExposeSecret::expose_secret(key).is_empty())
    }

    /// Splits a model entry of the form `alias:real_model` into `(Some(alias), real_model)`,
    /// or `(None, entry)` if there is no `:` separator.
    pub fn split_alias(entry: &str) -> (Option<&str>, &str) {
        match entry.split_once(':') {
            Some((alias, model)) => (Some(alias), model),
            None => (None, entry),
        }
    }
}
