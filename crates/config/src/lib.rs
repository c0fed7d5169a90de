//! Configuration structures mapping the toolify.toml configuration file.

#![deny(missing_docs)]

mod auth;
mod features;
mod loader;
mod server;
mod upstream;

use std::path::Path;

pub use auth::ClientAuthConfig;
pub use features::FeaturesConfig;
use serde::Deserialize;
pub use server::ServerConfig;
pub use upstream::UpstreamServiceConfig;

/// Main configuration structure for the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Configured upstream completion backends.
    pub upstream_services: Vec<UpstreamServiceConfig>,
    /// Client bearer-token allow-list.
    pub client_authentication: ClientAuthConfig,
    /// Feature toggles for the function-calling transformation pipeline.
    pub features: FeaturesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream_services: Vec::new(),
            client_authentication: ClientAuthConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file path, expanding `{{ env.VAR }}` placeholders and
    /// validating the result.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one usable upstream, that aliases don't
    /// collide with plain model names, and that the remaining invariants in [`loader`] hold.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Every upstream service with a usable (non-empty) API key.
    pub fn usable_services(&self) -> impl Iterator<Item = &UpstreamServiceConfig> {
        self.upstream_services.iter().filter(|s| s.is_usable())
    }

    /// The configured default service, if any, preferring one that is also usable.
    pub fn default_service(&self) -> Option<&UpstreamServiceConfig> {
        self.upstream_services
            .iter()
            .filter(|s| s.is_default && s.is_usable())
            .max_by_key(|s| s.priority)
            .or_else(|| self.upstream_services.iter().filter(|s| s.is_default).max_by_key(|s| s.priority))
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                timeout: 180s,
            },
            upstream_services: [],
            client_authentication: ClientAuthConfig {
                allowed_keys: [],
            },
            features: FeaturesConfig {
                enable_function_calling: true,
                convert_developer_to_system: true,
                prompt_template: None,
                key_passthrough: false,
                model_passthrough: false,
                log_level: "info",
            },
        }
        "#);
    }
}
