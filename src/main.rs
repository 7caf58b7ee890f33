//! Liten Gateway
//!
//! Front door for a set of local backends: routes by `Host` header or path
//! prefix, checks API keys, enforces per-route rate limits, splices
//! WebSocket upgrades, and can publish itself through an ngrok tunnel.
//!
//! ```text
//!     Client ──▶ http::server ──┬─▶ upgrade dispatcher ──▶ splice ──▶ Backend
//!                               │
//!                               └─▶ pipeline: CORS → route → auth → rate limit → proxy ──▶ Backend
//!
//!     liten-cli ──▶ admin API ──▶ gateway (domains, keys, reload, tunnel)
//! ```

use std::path::PathBuf;

use clap::Parser;

use liten_gateway::lifecycle::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "liten-gateway", version, about = "Liten request gateway")]
struct Args {
    /// Config file (TOML, YAML or JSON). Defaults to the first config.* in the working directory.
    #[arg(short, long, env = "LITEN_CONFIG")]
    config: Option<PathBuf>,

    /// Open the public tunnel at startup.
    #[arg(long)]
    tunnel: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    lifecycle::run(StartupOptions {
        config_path: args.config,
        tunnel: args.tunnel,
    })
    .await
}
