use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zbus::{Connection, proxy};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Resume watcher.
///
/// Subscribes to logind's `PrepareForSleep` on the system bus. Monitors
/// often come back with a different DDC/CI state after suspend, so every
/// resume requests a scan.
///
/// # Priority and Criticality
///
/// - **Priority**: 5
/// - **Critical**: No (headless systems may have no logind)
pub struct PowerWatcherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl PowerWatcherServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for PowerWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        if !self.state.config().watch_power {
            info!("Power watcher disabled");
            return Ok(());
        }
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_power_watcher(event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "PowerWatcherService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

/// Maps a `PrepareForSleep` argument to the event it triggers.
fn sleep_transition(start: bool) -> Option<Event> {
    (!start).then_some(Event::PowerResumed)
}

async fn run_power_watcher(event_bus: EventBus, cancel_token: CancellationToken) -> Result<()> {
    let connection = Connection::system()
        .await
        .context("Failed to connect to the system bus")?;
    let proxy = Login1ManagerProxy::new(&connection)
        .await
        .context("Failed to create logind proxy")?;
    let mut signals = proxy
        .receive_prepare_for_sleep()
        .await
        .context("Failed to subscribe to PrepareForSleep")?;
    info!("Watching logind for resume");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Power watcher service cancelled");
                break;
            }
            signal = signals.next() => {
                let Some(signal) = signal else {
                    warn!("logind signal stream ended");
                    break;
                };
                match signal.args() {
                    Ok(args) => {
                        debug!("PrepareForSleep({})", args.start());
                        if let Some(event) = sleep_transition(*args.start()) {
                            info!("System resumed, requesting scan");
                            if let Err(e) = event_bus.publish(event) {
                                error!("Failed to publish resume: {e}");
                            }
                        }
                    }
                    Err(e) => warn!("Malformed PrepareForSleep signal: {e}"),
                }
            }
        }
    }

    Ok(())
}
