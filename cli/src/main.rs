use std::net::SocketAddr;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::args::Args;

mod args;

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::Config::load(&args.config)?;

    let log_filter = args.log.as_deref().unwrap_or(&config.features.log_level);
    server::logger::init(log_filter);

    log::info!("toolify {}", env!("CARGO_PKG_VERSION"));

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse::<SocketAddr>().expect("valid default address"));

    let router = toolify_core::router(&config).await?;

    let shutdown_signal = CancellationToken::new();
    let shutdown = shutdown_signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server::serve(server::ServeConfig { listen_address, config, router, shutdown_signal }).await
}
