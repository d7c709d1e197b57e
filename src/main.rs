//! content-gateway: single-origin API gateway for the content planning dashboard.
//!
//! ```text
//!   Browser ──▶ /api/<path>?<query> ──▶ content-gateway ──▶ <upstream>/api/<path>?<query>
//!   Browser ◀── status + content type + body ◀──────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use content_gateway::config::ConfigOverrides;
use content_gateway::lifecycle::startup::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "content-gateway")]
#[command(version, about = "Relays /api requests from the dashboard to the upstream API", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream base URL, e.g. http://web:8000.
    #[arg(short, long, env = "GATEWAY_UPSTREAM_URL")]
    upstream: Option<String>,

    /// Address to listen on, e.g. 0.0.0.0:3000.
    #[arg(short, long, env = "GATEWAY_BIND_ADDRESS")]
    bind: Option<String>,

    /// Reload the configuration file when it changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let options = StartupOptions {
        config_path: cli.config,
        overrides: ConfigOverrides {
            upstream_url: cli.upstream,
            bind_address: cli.bind,
        },
        watch: cli.watch,
    };

    if let Err(e) = startup::run(options).await {
        eprintln!("content-gateway: {}", e);
        std::process::exit(1);
    }
}
