//! Config file watching with coalesced reloads
//!
//! Editors often produce several notify events for a single save. Events are
//! forwarded to one reload task, which waits until the file has been quiet for
//! `DEBOUNCE` and then reloads once.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last change before the file is re-read
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Delivers one valid config per burst of file changes
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let (changed_tx, changed_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(10);

        // Runs on notify's thread; only the fact that something changed crosses over
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                    debug!("Config file changed: {:?}", event.paths);
                    let _ = changed_tx.send(());
                }
                Ok(_) => {}
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Config file watcher started for: {}", config_path);
        tokio::spawn(reload_on_change(config_path, changed_rx, tx));

        Ok((Self { _watcher: watcher, rx }, Arc::new(initial_config)))
    }

    /// Wait for the next valid config; `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

/// Reload once per burst of change notifications
///
/// Ends when the notify watcher is dropped or nobody listens for configs.
async fn reload_on_change(
    config_path: String,
    mut changed: mpsc::UnboundedReceiver<()>,
    configs: mpsc::Sender<AppConfig>,
) {
    while changed.recv().await.is_some() {
        loop {
            match tokio::time::timeout(DEBOUNCE, changed.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match AppConfig::load(&config_path).await {
            Ok(new_config) => {
                info!("Configuration reloaded");
                if configs.send(new_config).await.is_err() {
                    debug!("Config receiver dropped, stopping reloads");
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to reload config (keeping old config): {:#}", e);
            }
        }
    }
}
