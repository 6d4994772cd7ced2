//! Reconciliation of the monitor registry with the attached hardware.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::time::{Instant, sleep, timeout};

use crate::{
    config::Limits,
    device::{DeviceEnumerator, MonitorDevice, same_device},
    event::{Event, EventBus},
    monitor::{MonitorRecord, MonitorSnapshot, release},
    name_cache::{NameCache, NameStore},
    registry::MonitorRegistry,
    single_flight::{FlightGuard, SingleFlight},
};

/// Result of a [`MonitorController::scan`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was running; nothing was done.
    Skipped,
    Completed {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

/// Result of a [`MonitorController::refresh_targets`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Skipped,
    /// Number of targets whose brightness was read successfully.
    Refreshed(usize),
}

/// Owns the registry and keeps it in sync with the hardware.
///
/// Scans and refreshes are both single-flight. A refresh requested while a
/// scan runs is skipped, since the scan fetches brightness itself.
pub struct MonitorController {
    registry: MonitorRegistry,
    names: NameCache,
    enumerator: Box<dyn DeviceEnumerator>,
    limits: Limits,
    device_timeout: Duration,
    event_bus: EventBus,
    scan_gate: SingleFlight,
    update_gate: SingleFlight,
}

impl MonitorController {
    pub fn new(
        enumerator: Box<dyn DeviceEnumerator>,
        names: NameCache,
        limits: Limits,
        device_timeout: Duration,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry: MonitorRegistry::new(),
            names,
            enumerator,
            limits,
            device_timeout,
            event_bus,
            scan_gate: SingleFlight::new(),
            update_gate: SingleFlight::new(),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn names(&self) -> &NameCache {
        &self.names
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_gate.is_active()
    }

    pub async fn monitors(&self) -> Vec<MonitorSnapshot> {
        self.registry.describe().await
    }

    /// Runs one reconciliation pass unless another one is in flight.
    pub async fn scan(&self) -> Result<ScanOutcome> {
        let Some(guard) = self.scan_gate.try_enter() else {
            debug!("Scan already running, request dropped");
            return Ok(ScanOutcome::Skipped);
        };

        self.event_bus.notify(Event::ScanningChanged(true));
        let result = self.scan_pass().await;
        drop(guard);
        self.event_bus.notify(Event::ScanningChanged(false));

        match result {
            Ok((added, removed)) => {
                info!(
                    "Scan finished: {} added, {} removed, {} registered",
                    added.len(),
                    removed.len(),
                    self.registry.len().await
                );
                Ok(ScanOutcome::Completed { added, removed })
            }
            Err(e) => {
                error!("Scan failed: {e:#}");
                Err(e)
            }
        }
    }

    async fn scan_pass(&self) -> Result<(Vec<String>, Vec<String>)> {
        let scan_start = std::time::Instant::now();
        let pool: Vec<Arc<MonitorRecord>> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .take(self.limits.max_monitor_count)
            .collect();

        let devices = timeout(self.device_timeout, self.enumerator.enumerate())
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.device_timeout))
            .and_then(|r| r)
            .with_context(|| format!("Failed to enumerate {} monitors", self.enumerator.name()))?;
        debug!("{} reported {} monitors", self.enumerator.name(), devices.len());

        let mut removed = Vec::new();
        for record in self.registry.snapshot().await {
            if !devices.iter().any(|d| same_device(d.id(), record.device_id())) {
                self.retire(&record).await;
                removed.push(record.device_id().to_string());
            }
        }

        let mut added = Vec::new();
        let mut fetches = Vec::new();
        for device in devices {
            if let Some(record) = self.adopt(device).await {
                added.push(record.device_id().to_string());
                if record.is_target() {
                    fetches.push(record);
                }
            }
        }

        for record in pool {
            if self.registry.contains(record.device_id()).await && record.updated_before(scan_start)
            {
                record.set_target(true);
                fetches.push(record);
            }
        }
        self.fetch_all(&fetches).await;

        Ok((added, removed))
    }

    /// Saves the name, unregisters and releases a departed monitor.
    async fn retire(&self, record: &Arc<MonitorRecord>) {
        self.names
            .store(record.device_id(), record.name().as_deref());
        self.registry.remove(record.device_id()).await;
        record.dispose(self.device_timeout).await;
        info!("Monitor {} removed", record.device_id());
        self.event_bus
            .notify(Event::MonitorRemoved(record.device_id().to_string()));
    }

    /// Registers a newly reported device. Known or repeated devices are
    /// released and `None` is returned.
    async fn adopt(&self, device: Box<dyn MonitorDevice>) -> Option<Arc<MonitorRecord>> {
        if self.registry.contains(device.id()).await {
            release(device.as_ref(), self.device_timeout).await;
            return None;
        }

        let record = Arc::new(MonitorRecord::new(device));
        record.set_name(self.names.lookup(record.device_id()));
        if self.registry.len().await < self.limits.max_monitor_count {
            record.set_target(true);
        }
        if let Err(e) = self.registry.insert(record.clone()).await {
            warn!("{e}");
            record.dispose(self.device_timeout).await;
            return None;
        }

        info!(
            "Monitor {} added{}",
            record.device_id(),
            if record.is_target() { " as target" } else { "" }
        );
        self.event_bus
            .notify(Event::MonitorAdded(record.device_id().to_string()));
        Some(record)
    }

    /// Reads brightness for every record concurrently. Returns the number of
    /// successful reads.
    async fn fetch_all(&self, records: &[Arc<MonitorRecord>]) -> usize {
        let results = join_all(
            records
                .iter()
                .map(|record| record.fetch_brightness(self.device_timeout)),
        )
        .await;

        records
            .iter()
            .zip(results)
            .filter(|(record, result)| match result {
                Ok(brightness) => {
                    self.event_bus.notify(Event::BrightnessUpdated {
                        device_id: record.device_id().to_string(),
                        brightness: *brightness,
                    });
                    true
                }
                Err(e) => {
                    warn!("{e:#}");
                    false
                }
            })
            .count()
    }

    /// Re-reads brightness of the target monitors.
    pub async fn refresh_targets(&self) -> RefreshOutcome {
        if self.scan_gate.is_active() {
            debug!("Refresh skipped, scan in progress");
            return RefreshOutcome::Skipped;
        }
        let Some(_guard) = self.update_gate.try_enter() else {
            debug!("Refresh already running, request dropped");
            return RefreshOutcome::Skipped;
        };

        let targets = self.registry.targets().await;
        let refreshed = self.fetch_all(&targets).await;
        debug!("Refreshed {refreshed} of {} targets", targets.len());
        RefreshOutcome::Refreshed(refreshed)
    }

    /// Applies a brightness value reported by the host.
    ///
    /// The first record whose identity prefixes `instance_name` is updated in
    /// place without touching the hardware. Returns whether a record matched.
    pub async fn report_brightness(&self, instance_name: &str, brightness: i32) -> bool {
        let Some(record) = self.registry.find_by_instance(instance_name).await else {
            debug!("No monitor matches reported instance {instance_name}");
            return false;
        };

        record.record_brightness(brightness);
        self.event_bus.notify(Event::BrightnessUpdated {
            device_id: record.device_id().to_string(),
            brightness,
        });
        true
    }

    pub async fn set_brightness(&self, device_id: &str, brightness: i32) -> Result<()> {
        let Some(record) = self.registry.find(device_id).await else {
            bail!("Monitor {device_id} not found");
        };

        record
            .apply_brightness(brightness, self.device_timeout)
            .await?;
        self.event_bus.notify(Event::BrightnessUpdated {
            device_id: record.device_id().to_string(),
            brightness,
        });
        Ok(())
    }

    /// Renames a monitor. An empty name clears it.
    pub async fn set_name(&self, device_id: &str, name: &str) -> Result<()> {
        let Some(record) = self.registry.find(device_id).await else {
            bail!("Monitor {device_id} not found");
        };

        let name = name.trim();
        record.set_name((!name.is_empty()).then(|| name.to_string()));
        self.event_bus.notify(Event::NameChanged {
            device_id: record.device_id().to_string(),
        });
        Ok(())
    }

    /// Releases every monitor and persists the remembered names.
    ///
    /// Waits briefly for a running scan, then closes the registry so a
    /// scan that outlives the wait releases what it finds instead of
    /// registering it. A failed save is logged and does not stop the
    /// shutdown.
    pub async fn shutdown(&self, store: &dyn NameStore) {
        let _guard = self.wait_for_scan().await;

        let records = self.registry.close().await;
        for record in &records {
            self.names
                .store(record.device_id(), record.name().as_deref());
            record.dispose(self.device_timeout).await;
        }
        self.names.truncate();
        info!("Released {} monitors", records.len());

        if let Err(e) = store.save(&self.names.sorted_entries()).await {
            error!("Failed to save monitor names: {e:#}");
        }
    }

    async fn wait_for_scan(&self) -> Option<FlightGuard<'_>> {
        let deadline = Instant::now() + self.device_timeout * 2;
        loop {
            if let Some(guard) = self.scan_gate.try_enter() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                warn!("Scan still running, shutting down anyway");
                return None;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}
