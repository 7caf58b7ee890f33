//! Configuration file watcher for hot reload.
//!
//! Editors often save by writing a temp file and renaming it over the
//! original, which drops a watch placed on the file itself. The watcher
//! therefore watches the parent directory and filters by file name. Bursts
//! of events are coalesced before the file is re-read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Quiet period after the last change before reloading.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Monitors the configuration file and emits validated configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Must be called inside a Tokio runtime; the returned
    /// watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let (change_tx, change_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event, file_name.as_deref()) => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(reload_loop(self.path.clone(), change_rx, self.update_tx));

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}

async fn reload_loop(
    path: PathBuf,
    mut changes: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<GatewayConfig>,
) {
    while changes.recv().await.is_some() {
        // Coalesce: wait until no change has arrived for one quiet period.
        while let Ok(Some(())) = tokio::time::timeout(DEBOUNCE, changes.recv()).await {}

        tracing::info!(path = %path.display(), "Config file change detected, reloading");
        match load_config(&path) {
            Ok(config) => {
                if updates.send(config).is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping current configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rewrite_produces_one_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 8080\n").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _handle = watcher.run().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, "port = 9090\n").unwrap();
        std::fs::write(&path, "port = 9191\n").unwrap();

        let config = tokio::time::timeout(Duration::from_secs(10), updates.recv())
            .await
            .expect("no reload observed")
            .unwrap();
        assert_eq!(config.port, 9191);
    }

    #[test]
    fn ignores_sibling_files() {
        let event = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/etc/liten/other.toml"));
        assert!(!is_relevant(&event, Some(std::ffi::OsStr::new("config.toml"))));

        let event = Event::new(notify::EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/etc/liten/config.toml"));
        assert!(is_relevant(&event, Some(std::ffi::OsStr::new("config.toml"))));
    }
}
