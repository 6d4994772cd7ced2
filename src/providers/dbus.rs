//! D-Bus service provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    event::EventBus,
    interface::{DBusInterface, OBJECT_PATH, SERVICE_NAME},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// D-Bus service provider for external system integration.
///
/// Exposes the monitor registry and its controls on the session bus.
///
/// # Priority and Criticality
///
/// - **Priority**: 9
/// - **Critical**: Yes
///
/// # Interface
///
/// - **Service Name**: `io.github.dimmerd`
/// - **Object Path**: `/io/github/dimmerd`
///
/// # Requirements
///
/// Requires a running D-Bus session bus. Creation fails without one, which
/// the system coordinator treats as "run without D-Bus".
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    /// Creates a new D-Bus service provider with session bus connection.
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }

    /// Connection shared with the signal relay.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let interface = DBusInterface::new(
            self.state.clone(),
            env!("CARGO_PKG_VERSION").to_string(),
            self.event_bus.clone(),
        );
        self.connection
            .object_server()
            .at(OBJECT_PATH, interface)
            .await
            .context("Failed to register D-Bus interface")?;
        self.connection
            .request_name(SERVICE_NAME)
            .await
            .with_context(|| format!("Failed to acquire bus name {SERVICE_NAME}"))?;
        info!("D-Bus interface registered as {SERVICE_NAME}");

        let connection = self.connection.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_dbus_service(connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Holds the bus name until cancellation, then releases it.
async fn run_dbus_service(connection: Connection, cancel_token: CancellationToken) -> Result<()> {
    cancel_token.cancelled().await;
    info!("D-Bus service cancelled");

    if let Err(e) = connection.release_name(SERVICE_NAME).await {
        warn!("Failed to release {SERVICE_NAME}: {e}");
    }
    if let Err(e) = connection
        .object_server()
        .remove::<DBusInterface, _>(OBJECT_PATH)
        .await
    {
        warn!("Failed to remove D-Bus interface: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app_context::testing::mock_state, config::Config, device::mock::MockHardware};

    #[tokio::test]
    async fn dbus_service_lifecycle_when_bus_available() {
        let hardware = MockHardware::with_panels(&["D1"]);
        let event_bus = EventBus::new();
        let (state, _store) = mock_state(&hardware, Config::default(), event_bus.clone());
        let mut task_manager = TaskManager::new();

        // Note: test environments usually have no session bus
        match DBusServiceProvider::new(state, event_bus).await {
            Ok(provider) => {
                assert_eq!(provider.name(), "DBusService");
                assert_eq!(provider.priority(), 9);
                assert!(provider.is_critical());

                if provider.start(&mut task_manager).await.is_ok() {
                    assert!(task_manager.is_running("DBusService"));
                    task_manager.shutdown_all().await.unwrap();
                    assert_eq!(task_manager.active_count(), 0);
                }
            }
            Err(e) => {
                assert!(e.to_string().contains("session bus"));
            }
        }
    }
}
