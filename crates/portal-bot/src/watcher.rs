//! Config file hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use portal::{Coordinator, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BotConfig, ConfigError};

/// Editors tend to write a file in several steps.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Keeps the file watcher alive. Dropping it stops reloads.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether a notify event touches the config file.
pub fn is_config_event(event: &Event, path: &Path) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    let Some(name) = path.file_name() else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|changed| changed.file_name() == Some(name))
}

/// Re-read the config file and hand the new settings to the coordinator.
///
/// Connection settings (homeserver, token, database) only take effect on
/// restart.
pub async fn reload<T: Transport + 'static>(
    path: &Path,
    coordinator: &Arc<Coordinator<T>>,
) -> Result<JoinHandle<()>, ConfigError> {
    let config = BotConfig::load(path)?;
    let settings = config.settings()?;
    info!(path = %path.display(), "Config reloaded");
    Ok(coordinator.apply_settings(settings).await)
}

/// Watch the config file's directory and reload on changes.
///
/// The directory is watched rather than the file so editors that replace the
/// file on save keep triggering reloads.
pub fn watch_config<T: Transport + 'static>(
    path: PathBuf,
    coordinator: Arc<Coordinator<T>>,
) -> Result<ConfigWatcher, ConfigError> {
    let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Result<Event>>(64);

    let mut watcher = notify::recommended_watcher(move |res| {
        // Runs on the notify thread
        let _ = notify_tx.blocking_send(res);
    })
    .map_err(ConfigError::Watch)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(ConfigError::Watch)?;
    info!(path = %path.display(), "Watching config file");

    let task = tokio::spawn(async move {
        while let Some(res) = notify_rx.recv().await {
            match res {
                Ok(event) if is_config_event(&event, &path) => {
                    tokio::time::sleep(DEBOUNCE).await;
                    // Collapse the burst that arrived while sleeping
                    while notify_rx.try_recv().is_ok() {}

                    if let Err(e) = reload(&path, &coordinator).await {
                        error!(path = %path.display(), "Config reload failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Config watch error: {}", e),
            }
        }
        debug!("Config watcher stopped");
    });

    Ok(ConfigWatcher {
        _watcher: watcher,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn matches_writes_to_config_file() {
        let config = Path::new("/etc/portal/portal.toml");
        let modify = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/etc/portal/portal.toml",
        );
        let create = event(EventKind::Create(CreateKind::File), "/etc/portal/portal.toml");

        assert!(is_config_event(&modify, config));
        assert!(is_config_event(&create, config));
    }

    #[test]
    fn ignores_other_files_and_reads() {
        let config = Path::new("/etc/portal/portal.toml");
        let other = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/etc/portal/portal.db",
        );
        let access = event(EventKind::Access(AccessKind::Any), "/etc/portal/portal.toml");

        assert!(!is_config_event(&other, config));
        assert!(!is_config_event(&access, config));
    }
}
