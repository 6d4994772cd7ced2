use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState, controller::RefreshOutcome, providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Periodic brightness refresh of the target monitors.
///
/// Disabled when `refresh_seconds` is 0. A tick that lands during a scan or
/// an unfinished refresh is skipped by the controller.
///
/// # Priority and Criticality
///
/// - **Priority**: 8
/// - **Critical**: No
pub struct RefreshServiceProvider {
    state: Arc<AppState>,
}

impl RefreshServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for RefreshServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let Some(period) = self.state.config().refresh_interval() else {
            info!("Periodic refresh disabled");
            return Ok(());
        };
        let state = self.state.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_refresh_service(state, period, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "RefreshService"
    }

    fn priority(&self) -> i32 {
        8
    }
}

async fn run_refresh_service(
    state: Arc<AppState>,
    period: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the startup scan has just read every target
    interval.tick().await;
    let mut ticks = IntervalStream::new(interval);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Refresh service cancelled");
                break;
            }
            Some(_instant) = ticks.next() => {
                match state.controller.refresh_targets().await {
                    RefreshOutcome::Refreshed(n) => debug!("Periodic refresh read {n} monitors"),
                    RefreshOutcome::Skipped => debug!("Periodic refresh skipped"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app_context::testing::mock_state, config::Config, device::mock::MockHardware, event::EventBus};
    use pretty_assertions::assert_eq;
    use tokio::time::{advance, sleep};

    fn config(refresh_seconds: u64) -> Config {
        Config {
            refresh_seconds,
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_targets_on_every_tick() {
        let hardware = MockHardware::with_panels(&["D1"]);
        let (state, _store) = mock_state(&hardware, config(10), EventBus::new());
        state.controller.scan().await.unwrap();
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_refresh_service(
            state.clone(),
            Duration::from_secs(10),
            token.clone(),
        ));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(hardware.panel("D1").reads(), 1);

        advance(Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(hardware.panel("D1").reads(), 2);

        advance(Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(hardware.panel("D1").reads(), 3);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn disabled_refresh_spawns_nothing() {
        let hardware = MockHardware::new();
        let (state, _store) = mock_state(&hardware, config(0), EventBus::new());
        let mut task_manager = TaskManager::new();

        RefreshServiceProvider::new(state)
            .start(&mut task_manager)
            .await
            .unwrap();

        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn enabled_refresh_registers_task() {
        let hardware = MockHardware::new();
        let (state, _store) = mock_state(&hardware, config(30), EventBus::new());
        let mut task_manager = TaskManager::new();

        RefreshServiceProvider::new(state)
            .start(&mut task_manager)
            .await
            .unwrap();

        assert!(task_manager.is_running("RefreshService"));
        task_manager.shutdown_all().await.unwrap();
    }
}
