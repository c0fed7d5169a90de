use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the toolify proxy binary.
#[derive(Debug, Parser)]
#[command(version, about = "Protocol-translating reverse proxy retrofitting function calling onto LLM backends")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "TOOLIFY_CONFIG", default_value = "toolify.toml")]
    pub config: PathBuf,

    /// Overrides `features.log_level` from the configuration file.
    #[arg(long, env = "TOOLIFY_LOG")]
    pub log: Option<String>,

    /// Overrides `server.listen_address` from the configuration file.
    #[arg(long, env = "TOOLIFY_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
}
