//! HTTP server shell: binds the listener, applies the bearer-auth layer, and serves the
//! router built by `toolify_core`.

#![deny(missing_docs)]

pub mod auth;
pub mod logger;

use std::net::SocketAddr;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::Router;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration for serving the proxy.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The loaded configuration, used only to derive the auth layer here; the router itself
    /// is built by the caller from the same configuration.
    pub config: Config,
    /// The router to serve, already wired up with every proxy endpoint.
    pub router: Router,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
}

/// Binds the listener, wraps `router` with the bearer-auth layer, and serves it until
/// `shutdown_signal` is cancelled.
pub async fn serve(ServeConfig { listen_address, config, router, shutdown_signal }: ServeConfig) -> anyhow::Result<()> {
    let auth_layer = AuthLayer::new(config.client_authentication.allowed_keys.clone(), config.features.key_passthrough);
    let app = router.layer(auth_layer);

    let listener = TcpListener::bind(listen_address).await.map_err(|e| anyhow!("failed to bind to {listen_address}: {e}"))?;

    log::info!("listening on http://{listen_address}");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(|e| anyhow!("server error: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
