//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Watcher, RecursiveMode, Event, RecommendedWatcher, Config};
use tokio::sync::mpsc;
use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (Self {
            path: path.to_path_buf(),
            update_tx,
        }, update_rx)
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Config file change detected, reloading");
                        match load_config(&path) {
                            Ok(new_config) => {
                                if tx.send(new_config).is_err() {
                                    tracing::debug!("Config receiver dropped, update discarded");
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
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
    use crate::config::StrategyKind;
    use std::io::Write;

    #[tokio::test]
    async fn test_reload_on_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[balancer]\nstrategy = \"round_robin\"").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(file.path());
        let _guard = watcher.run().unwrap();

        let mut handle = file.reopen().unwrap();
        handle.set_len(0).unwrap();
        writeln!(handle, "[balancer]\nstrategy = \"by_active_load\"").unwrap();
        handle.sync_all().unwrap();

        // Truncation may surface as its own event; wait for the final content.
        let reloaded = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(update) = updates.recv().await {
                if update.balancer.strategy == StrategyKind::ByActiveLoad {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(reloaded, Ok(true));
    }
}
