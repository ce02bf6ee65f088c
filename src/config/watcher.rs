//! Config file watching for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors and
//! deploy tools often replace the file by rename, which drops a watch held
//! on the old inode. Events for other files in that directory are ignored,
//! and a reload that parses to the config already in effect is not sent.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RelayConfig;

/// Watches the config file and sends each new valid config.
pub struct ConfigWatcher {
    path: PathBuf,
    current: RelayConfig,
    update_tx: mpsc::UnboundedSender<RelayConfig>,
}

impl ConfigWatcher {
    /// `current` is the config already in effect; identical reloads are skipped.
    pub fn new(path: &Path, current: RelayConfig) -> (Self, mpsc::UnboundedReceiver<RelayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            current,
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut reloader = Reloader::new(self.path.clone(), self.current);
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if reloader.wants(&event) => {
                    if let Some(config) = reloader.reload() {
                        if tx.send(config).is_err() {
                            tracing::debug!("Config receiver gone, dropping reload");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), dir = %dir.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Reload state for one config file.
struct Reloader {
    path: PathBuf,
    file_name: Option<OsString>,
    last: RelayConfig,
}

impl Reloader {
    fn new(path: PathBuf, last: RelayConfig) -> Self {
        let file_name = path.file_name().map(|name| name.to_os_string());
        Self { path, file_name, last }
    }

    /// Whether `event` may have changed the watched file.
    fn wants(&self, event: &Event) -> bool {
        if !(event.kind.is_modify() || event.kind.is_create()) {
            return false;
        }
        event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == self.file_name.as_deref())
    }

    /// Load the file. Returns the config only if it is valid and differs
    /// from the last one returned.
    fn reload(&mut self) -> Option<RelayConfig> {
        match load_config(&self.path) {
            Ok(config) if config == self.last => {
                tracing::debug!(path = %self.path.display(), "Config file touched but unchanged");
                None
            }
            Ok(config) => {
                tracing::info!(path = %self.path.display(), "Config file changed, reloading");
                self.last = config.clone();
                Some(config)
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
                None
            }
        }
    }
}
