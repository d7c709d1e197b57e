//! Startup orchestration.
//!
//! Fail fast: any error before the listener is serving is fatal. Steps run
//! in order: config, logging, metrics, state, listener, watcher, serve.

use std::path::PathBuf;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::loader::resolve_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, ConfigOverrides};
use crate::http::{HttpServer, SetupError};
use crate::lifecycle::signals::spawn_signal_listener;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};

/// What the command line asked for.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    /// Reload the config file when it changes.
    pub watch: bool,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialise logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the gateway until a shutdown signal arrives.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let config = resolve_config(options.config_path.as_deref(), &options.overrides)?;

    logging::init_logging(&config.observability).map_err(|e| StartupError::Logging(e.to_string()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "content-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        upstream = config.upstream.base_url.as_deref().unwrap_or_default(),
        api_prefix = %config.upstream.api_prefix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config.clone())?;

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match (&options.config_path, options.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path, options.overrides.clone());
            (Some(watcher.run()?), updates)
        }
        (None, true) => {
            tracing::warn!("--watch given without --config; hot reload disabled");
            (None, mpsc::unbounded_channel().1)
        }
        (_, false) => (None, mpsc::unbounded_channel().1),
    };

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
