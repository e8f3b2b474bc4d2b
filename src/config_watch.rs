// Config hot reload
//
// notify delivers file events on its own thread. Reloaded configs are parked
// in a slot that the render thread drains between frames.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    slot: Arc<Mutex<Option<Config>>>,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let slot = Arc::new(Mutex::new(None));

        let callback_slot = Arc::clone(&slot);
        let callback_path = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_config_change(&event, &callback_path) => {
                match Config::load_from_path(&callback_path) {
                    Ok(config) => {
                        log::info!("Reloaded {:?}", callback_path);
                        *callback_slot.lock() = Some(config);
                    }
                    Err(e) => log::warn!("Ignoring config change: {:#}", e),
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Config watch error: {}", e),
        })
        .context("Failed to create config watcher")?;

        // Editors replace files on save; watch the directory, filter by name
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
        log::info!("Watching {:?} for changes", path);

        Ok(Self {
            _watcher: watcher,
            slot,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent successfully parsed config since the last call.
    pub fn take_reloaded(&self) -> Option<Config> {
        self.slot.lock().take()
    }
}

fn is_config_change(event: &Event, path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == Some(name))
}
