use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Weak;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::ConfigStore;
use crate::error::Result;

/// Editors write files in several steps; events arriving within this window
/// collapse into a single reload.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Watches the directory holding the config file. Dropping it stops the
/// dispatch thread.
pub(crate) struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub(crate) fn spawn(store: Weak<ConfigStore>, path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        // Watch the parent dir: atomic saves replace the file's inode.
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        std::thread::Builder::new()
            .name("config-watch".into())
            .spawn(move || dispatch(rx, store, file_name))
            .map_err(notify::Error::io)?;

        tracing::debug!(file = %path.display(), "watching config file");
        Ok(Self { _watcher: watcher })
    }
}

fn dispatch(rx: Receiver<notify::Result<Event>>, store: Weak<ConfigStore>, file_name: OsString) {
    while let Ok(res) = rx.recv() {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "config watch error");
                continue;
            }
        };
        if !(event.kind.is_modify() || event.kind.is_create()) {
            continue;
        }
        if !event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
        {
            continue;
        }
        while rx.recv_timeout(DEBOUNCE).is_ok() {}

        let Some(store) = store.upgrade() else {
            break;
        };
        match store.reload() {
            Ok(()) => {
                tracing::info!("config file changed; reloaded");
                store.notify_changed();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to reload config; keeping current configuration");
            }
        }
    }
    tracing::debug!("config watcher stopped");
}
