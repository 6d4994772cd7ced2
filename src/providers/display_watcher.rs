use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::BackendCfg,
    event::{Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

const DEBOUNCE: Duration = Duration::from_millis(1500);

/// Display hotplug watcher.
///
/// Watches the directory where the backend's device nodes appear (the
/// backlight class directory, or `/dev` for the I2C buses used by DDC/CI)
/// and publishes [`AppEvent::DisplaysChanged`] once a burst of changes has
/// settled.
///
/// # Priority and Criticality
///
/// - **Priority**: 6
/// - **Critical**: No
pub struct DisplayWatcherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl DisplayWatcherServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for DisplayWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let config = self.state.config();
        if !config.watch_displays {
            info!("Display watcher disabled");
            return Ok(());
        }
        let spec = WatchSpec::for_backend(&config.backend);
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_display_watcher(spec, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DisplayWatcherService"
    }

    fn priority(&self) -> i32 {
        6
    }
}

/// What to watch and which entries count.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchSpec {
    dir: PathBuf,
    prefix: Option<&'static str>,
    debounce: Duration,
}

impl WatchSpec {
    fn for_backend(backend: &BackendCfg) -> Self {
        let prefix = match backend {
            BackendCfg::Sysfs { .. } => None,
            BackendCfg::Ddcutil { .. } => Some("i2c-"),
        };
        Self {
            dir: backend.watch_path(),
            prefix,
            debounce: DEBOUNCE,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        match self.prefix {
            None => true,
            Some(prefix) => path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix)),
        }
    }
}

/// Forwards notify callbacks into the async world.
#[derive(Debug)]
struct AsyncEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for AsyncEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to send filesystem event to async handler: {}", e);
        }
    }
}

async fn run_display_watcher(
    spec: WatchSpec,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(AsyncEventHandler { sender: event_tx })?;
    watcher
        .watch(&spec.dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", spec.dir.display()))?;
    info!("Watching {} for display changes", spec.dir.display());

    let mut debounce_interval = tokio::time::interval(spec.debounce);
    debounce_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut has_pending_event = false;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Display watcher service cancelled");
                break;
            }

            event_result = event_rx.recv() => {
                match event_result {
                    Some(Ok(event)) => {
                        let structural = event.kind.is_create() || event.kind.is_remove();
                        if structural && event.paths.iter().any(|p| spec.matches(p)) {
                            debug!("Display change: {:?} {:?}", event.kind, event.paths);
                            if !has_pending_event {
                                debounce_interval.reset();
                            }
                            has_pending_event = true;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Filesystem watcher error: {}", e);
                    }
                    None => {
                        warn!("Filesystem event channel closed, exiting");
                        break;
                    }
                }
            }

            _ = debounce_interval.tick(), if has_pending_event => {
                has_pending_event = false;
                info!("Display set changed, requesting scan");
                if let Err(e) = event_bus.publish(AppEvent::DisplaysChanged) {
                    error!("Failed to publish display change: {}", e);
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&spec.dir) {
        warn!("Failed to unwatch path during cleanup: {}", e);
    }
    info!("Display watcher service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn spec(dir: &Path, prefix: Option<&'static str>) -> WatchSpec {
        WatchSpec {
            dir: dir.to_path_buf(),
            prefix,
            debounce: Duration::from_millis(200),
        }
    }

    #[test]
    fn backend_selects_watch_target() {
        let ddc = WatchSpec::for_backend(&BackendCfg::Ddcutil {
            binary: PathBuf::from("ddcutil"),
        });
        assert_eq!(ddc.dir, PathBuf::from("/dev"));
        assert!(ddc.matches(Path::new("/dev/i2c-7")));
        assert!(!ddc.matches(Path::new("/dev/tty1")));

        let sysfs = WatchSpec::for_backend(&BackendCfg::Sysfs {
            root: PathBuf::from("/sys/class/backlight"),
        });
        assert_eq!(sysfs.dir, PathBuf::from("/sys/class/backlight"));
        assert!(sysfs.matches(Path::new("/sys/class/backlight/intel_backlight")));
    }

    #[tokio::test]
    async fn burst_of_changes_yields_one_event() {
        let dir = TempDir::new().unwrap();
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_display_watcher(
            spec(dir.path(), Some("i2c-")),
            event_bus.clone(),
            token.clone(),
        ));
        sleep(Duration::from_millis(300)).await;

        for bus in 0..4 {
            std::fs::write(dir.path().join(format!("i2c-{bus}")), "").unwrap();
            sleep(Duration::from_millis(20)).await;
        }

        let first = timeout(Duration::from_secs(5), events.recv()).await;
        assert_eq!(first.unwrap().unwrap(), AppEvent::DisplaysChanged);
        let second = timeout(Duration::from_millis(600), events.recv()).await;
        assert!(second.is_err(), "burst should collapse into one event");

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unrelated_entries_are_ignored() {
        let dir = TempDir::new().unwrap();
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_display_watcher(
            spec(dir.path(), Some("i2c-")),
            event_bus.clone(),
            token.clone(),
        ));
        sleep(Duration::from_millis(300)).await;

        std::fs::write(dir.path().join("tty3"), "").unwrap();

        let received = timeout(Duration::from_millis(800), events.recv()).await;
        assert!(received.is_err());

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_directory_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let result = run_display_watcher(
            spec(&dir.path().join("absent"), None),
            EventBus::new(),
            CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
    }
}
