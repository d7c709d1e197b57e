//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Watcher, RecursiveMode, Event, RecommendedWatcher, Config};
use tokio::sync::mpsc;
use crate::config::loader::{load_config, ConfigOverrides};
use crate::config::schema::GatewayConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: ConfigOverrides,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path, overrides: ConfigOverrides) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (Self {
            path: path.to_path_buf(),
            overrides,
            update_tx,
        }, update_rx)
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned handle must be kept alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let overrides = self.overrides.clone();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Config file change detected, reloading");
                        match load_config(&path, &overrides) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            }
        }, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn overrides() -> ConfigOverrides {
        ConfigOverrides {
            upstream_url: None,
            bind_address: Some("127.0.0.1:5000".into()),
        }
    }

    fn upstream_config(base_url: &str) -> String {
        format!("[upstream]\nbase_url = \"{}\"\n", base_url)
    }

    /// Wait for an update naming `base_url`, skipping earlier ones.
    async fn next_with_base(rx: &mut mpsc::UnboundedReceiver<GatewayConfig>, base_url: &str) -> GatewayConfig {
        tokio::time::timeout(WAIT, async {
            loop {
                let config = rx.recv().await.expect("watcher channel closed");
                if config.upstream.base_url.as_deref() == Some(base_url) {
                    return config;
                }
            }
        })
        .await
        .expect("no reload seen")
    }

    #[tokio::test]
    async fn rewrite_yields_config_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, upstream_config("http://web:8000")).unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(&path, overrides());
        let _handle = watcher.run().unwrap();

        std::fs::write(&path, upstream_config("http://localhost:8000")).unwrap();

        let config = next_with_base(&mut rx, "http://localhost:8000").await;
        assert_eq!(config.listener.bind_address, "127.0.0.1:5000");
    }

    #[tokio::test]
    async fn invalid_rewrite_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, upstream_config("http://web:8000")).unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(&path, overrides());
        let _handle = watcher.run().unwrap();

        std::fs::write(&path, upstream_config("ftp://web:8000")).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(outcome.is_err(), "invalid config must not be sent");

        // The watcher keeps going after a rejected change.
        std::fs::write(&path, upstream_config("http://web:9000")).unwrap();
        let config = next_with_base(&mut rx, "http://web:9000").await;
        assert_eq!(config.listener.bind_address, "127.0.0.1:5000");
    }
}
