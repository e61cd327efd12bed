//! Sitemap file watcher for proactive reload.
//!
//! Staleness is also detected lazily on request; the watcher only makes
//! the rebuild happen before the next request instead of during it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;
use crate::treeprocessor::TreeProcessor;

/// Watches the directory of the root sitemap and reports changes to it.
pub struct SitemapWatcher {
    path: PathBuf,
    change_tx: mpsc::UnboundedSender<PathBuf>,
}

impl SitemapWatcher {
    /// Returns the watcher and a receiver of change notifications.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                change_tx,
            },
            change_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        // Editors often replace the file, so the directory is watched.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let relevant = event
                        .paths
                        .iter()
                        .find(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if let Some(path) = relevant {
                        tracing::debug!(path = ?path, "Sitemap change detected");
                        let _ = tx.send(path.clone());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Sitemap watcher started");
        Ok(watcher)
    }
}

/// Refresh `processor` on every change notification until shutdown.
pub async fn refresh_on_change(
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    processor: Arc<TreeProcessor>,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            change = changes.recv() => {
                let Some(path) = change else { break };
                // Coalesce bursts of events from a single save.
                while changes.try_recv().is_ok() {}
                let processor = Arc::clone(&processor);
                let result = tokio::task::spawn_blocking(move || processor.refresh()).await;
                match result {
                    Ok(Ok(())) => tracing::info!(path = ?path, "Sitemap refreshed"),
                    Ok(Err(e)) => tracing::warn!(path = ?path, error = %e, "Sitemap refresh failed, previous tree kept"),
                    Err(e) => tracing::error!(error = %e, "Refresh task panicked"),
                }
            }
        }
    }
    tracing::debug!("Sitemap watcher stopped");
}
