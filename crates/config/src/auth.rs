//! Client authentication configuration.

use serde::Deserialize;

/// Bearer-token allow-list for client requests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientAuthConfig {
    /// Keys clients may present via `Authorization: Bearer <key>`. Ignored entirely when
    /// [`crate::FeaturesConfig::key_passthrough`] is enabled.
    pub allowed_keys: Vec<String>,
}
