//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::flags::FlagSet;
use super::loader::ConfigLoader;
use super::resolved::ResolvedConfig;

/// Watches the configuration file and re-resolves it on change.
pub struct ConfigWatcher {
    path: PathBuf,
    loader: ConfigLoader,
    flags: FlagSet,
    update_tx: mpsc::UnboundedSender<ResolvedConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, resolving with the same loader and flags
    /// the host used at startup.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(
        path: &Path,
        loader: ConfigLoader,
        flags: FlagSet,
    ) -> (Self, mpsc::UnboundedReceiver<ResolvedConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                loader,
                flags,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Events are handled on notify's background thread.
    ///
    /// Dropping the returned watcher stops watching.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            loader,
            flags,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?watched, "Config file change detected, reloading");
                    match loader.resolve(&flags) {
                        Ok(resolved) => {
                            if update_tx.send(resolved).is_err() {
                                tracing::debug!("Config update receiver dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
