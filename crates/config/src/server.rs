//! HTTP server configuration settings.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

fn default_timeout() -> Duration {
    Duration::from_secs(180)
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on. Defaults to `0.0.0.0:8000`.
    pub listen_address: Option<SocketAddr>,
    /// Per-request timeout, in seconds, applied to the upstream connect and response.
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            timeout: default_timeout(),
        }
    }
}

/// Deserializes a [`Duration`] from a plain integer number of seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
