use std::sync::Arc;

use log::{error, info};
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
    app_context::AppState,
    controller::{RefreshOutcome, ScanOutcome},
    event::{Event, EventBus},
    monitor::MonitorSnapshot,
};

pub const SERVICE_NAME: &str = "io.github.dimmerd";
pub const OBJECT_PATH: &str = "/io/github/dimmerd";

/// `(id, name, is_target, brightness)`; empty name and -1 stand for unknown.
pub type MonitorTuple = (String, String, bool, i32);

fn to_tuple(snapshot: MonitorSnapshot) -> MonitorTuple {
    (
        snapshot.device_id,
        snapshot.name.unwrap_or_default(),
        snapshot.is_target,
        snapshot.brightness.unwrap_or(-1),
    )
}

fn failed(e: anyhow::Error) -> fdo::Error {
    fdo::Error::Failed(format!("{e:#}"))
}

pub struct DBusInterface {
    state: Arc<AppState>,
    event_bus: EventBus,
    version: String,
}

impl DBusInterface {
    pub fn new(state: Arc<AppState>, version: String, event_bus: EventBus) -> Self {
        Self {
            state,
            event_bus,
            version,
        }
    }
}

#[interface(name = "io.github.dimmerd1")]
impl DBusInterface {
    #[zbus(signal, name = "ScanningChanged")]
    pub async fn scanning_changed_signal(emitter: &SignalEmitter<'_>, scanning: bool) -> zbus::Result<()>;

    #[zbus(signal, name = "MonitorsChanged")]
    pub async fn monitors_changed_signal(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<()> {
        info!("Stop requested over D-Bus");
        emitter.stopped().await?;
        self.event_bus
            .publish(Event::SystemShutdown)
            .map_err(failed)?;

        Ok(())
    }

    /// Runs a scan; false when one was already running.
    async fn scan(&self) -> fdo::Result<bool> {
        match self.state.controller.scan().await {
            Ok(ScanOutcome::Completed { .. }) => Ok(true),
            Ok(ScanOutcome::Skipped) => Ok(false),
            Err(e) => {
                error!("{e:#}");
                Err(failed(e))
            }
        }
    }

    /// Re-reads target brightness; false when skipped.
    async fn refresh(&self) -> bool {
        matches!(
            self.state.controller.refresh_targets().await,
            RefreshOutcome::Refreshed(_)
        )
    }

    async fn set_name(&self, id: &str, name: &str) -> fdo::Result<()> {
        self.state
            .controller
            .set_name(id, name)
            .await
            .map_err(failed)
    }

    async fn set_brightness(&self, id: &str, value: i32) -> fdo::Result<()> {
        if !(0..=100).contains(&value) {
            return Err(fdo::Error::InvalidArgs(format!(
                "brightness {value} is outside 0..=100"
            )));
        }
        self.state
            .controller
            .set_brightness(id, value)
            .await
            .map_err(failed)
    }

    /// Applies a brightness value observed by the host; false when no
    /// monitor matches.
    async fn report_brightness(&self, instance_name: &str, value: i32) -> bool {
        self.state
            .controller
            .report_brightness(instance_name, value)
            .await
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    #[zbus(property, name = "Scanning")]
    async fn is_scanning(&self) -> bool {
        self.state.controller.is_scanning()
    }

    #[zbus(property, name = "Monitors")]
    async fn monitor_list(&self) -> Vec<MonitorTuple> {
        self.state
            .controller
            .monitors()
            .await
            .into_iter()
            .map(to_tuple)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app_context::testing::mock_state, config::Config, device::mock::MockHardware};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn interface(hardware: &Arc<MockHardware>) -> DBusInterface {
        let event_bus = EventBus::new();
        let (state, _store) = mock_state(hardware, Config::default(), event_bus.clone());
        DBusInterface::new(state, "1.0.0".into(), event_bus)
    }

    #[test]
    fn unknown_fields_map_to_placeholders() {
        let tuple = to_tuple(MonitorSnapshot {
            device_id: "D1".into(),
            name: None,
            is_target: false,
            brightness: None,
        });

        assert_eq!(tuple, ("D1".to_string(), String::new(), false, -1));
    }

    #[tokio::test]
    async fn scan_populates_monitor_list() {
        let hardware = MockHardware::with_panels(&["D1", "D2"]);
        let iface = interface(&hardware);

        assert!(iface.scan().await.unwrap());
        iface.set_name("D2", "Right").await.unwrap();

        assert_eq!(
            iface.monitor_list().await,
            vec![
                ("D1".to_string(), String::new(), true, 50),
                ("D2".to_string(), "Right".to_string(), true, 50),
            ]
        );
        assert!(!iface.is_scanning().await);
        assert_eq!(iface.version().await, "1.0.0");
    }

    #[tokio::test]
    async fn failed_scan_is_reported() {
        let hardware = MockHardware::with_panels(&["D1"]);
        hardware.set_fail_enumeration(true);
        let iface = interface(&hardware);

        assert!(iface.scan().await.is_err());
    }

    #[tokio::test]
    async fn brightness_methods() {
        let hardware = MockHardware::with_panels(&["D1"]);
        let iface = interface(&hardware);
        iface.scan().await.unwrap();

        iface.set_brightness("D1", 65).await.unwrap();
        assert_eq!(hardware.panel("D1").brightness.load(Ordering::SeqCst), 65);

        assert!(matches!(
            iface.set_brightness("D1", 101).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
        assert!(iface.set_brightness("D9", 10).await.is_err());

        assert!(iface.report_brightness("d1#0", 12).await);
        assert_eq!(iface.monitor_list().await[0].3, 12);
        assert!(!iface.report_brightness("X", 12).await);

        assert!(iface.refresh().await);
        assert_eq!(iface.monitor_list().await[0].3, 65);
    }
}
