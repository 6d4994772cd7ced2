//! Registry entries for attached monitors.

use std::{
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use tokio::time::timeout;

use crate::device::MonitorDevice;

/// Last successful brightness reading of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub brightness: i32,
    pub update_time: Instant,
}

/// One live monitor owned by the [`MonitorRegistry`](crate::registry::MonitorRegistry).
///
/// Structural changes go through the registry; the fields here are updated
/// in place and are individually synchronized so readers never need the
/// registry lock.
#[derive(Debug)]
pub struct MonitorRecord {
    device_id: String,
    device: Box<dyn MonitorDevice>,
    name: RwLock<Option<String>>,
    is_target: AtomicBool,
    reading: RwLock<Option<Reading>>,
    disposed: AtomicBool,
}

/// Plain copy of a record for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub device_id: String,
    pub name: Option<String>,
    pub is_target: bool,
    pub brightness: Option<i32>,
}

impl MonitorRecord {
    pub fn new(device: Box<dyn MonitorDevice>) -> Self {
        Self {
            device_id: device.id().to_string(),
            device,
            name: RwLock::new(None),
            is_target: AtomicBool::new(false),
            reading: RwLock::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn name(&self) -> Option<String> {
        self.name
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether the monitor carries a non-empty display name.
    pub fn has_name(&self) -> bool {
        self.name().is_some_and(|name| !name.trim().is_empty())
    }

    pub fn set_name(&self, name: Option<String>) {
        *self
            .name
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = name;
    }

    pub fn is_target(&self) -> bool {
        self.is_target.load(Ordering::Acquire)
    }

    pub fn set_target(&self, is_target: bool) {
        self.is_target.store(is_target, Ordering::Release);
    }

    pub fn reading(&self) -> Option<Reading> {
        *self
            .reading
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn brightness(&self) -> Option<i32> {
        self.reading().map(|r| r.brightness)
    }

    pub fn update_time(&self) -> Option<Instant> {
        self.reading().map(|r| r.update_time)
    }

    /// True when the last reading is older than `instant` or missing.
    pub fn updated_before(&self, instant: Instant) -> bool {
        self.update_time().is_none_or(|t| t < instant)
    }

    /// Stores a brightness value and stamps the update time.
    pub fn record_brightness(&self, brightness: i32) {
        *self
            .reading
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Reading {
            brightness,
            update_time: Instant::now(),
        });
    }

    /// Reads brightness from hardware and stores it.
    ///
    /// Failures and timeouts leave the previous reading untouched.
    pub async fn fetch_brightness(&self, limit: Duration) -> Result<i32> {
        self.ensure_live()?;
        let brightness = timeout(limit, self.device.brightness())
            .await
            .map_err(|_| anyhow!("timed out after {limit:?}"))
            .and_then(|r| r)
            .with_context(|| format!("Failed to read brightness of {}", self.device_id))?;

        self.record_brightness(brightness);
        debug!("Brightness of {}: {brightness}", self.device_id);
        Ok(brightness)
    }

    /// Writes brightness to hardware and stores it on success.
    pub async fn apply_brightness(&self, brightness: i32, limit: Duration) -> Result<()> {
        self.ensure_live()?;
        timeout(limit, self.device.set_brightness(brightness))
            .await
            .map_err(|_| anyhow!("timed out after {limit:?}"))
            .and_then(|r| r)
            .with_context(|| format!("Failed to set brightness of {}", self.device_id))?;

        self.record_brightness(brightness);
        Ok(())
    }

    /// Releases the hardware handle, bounded by `limit`. Runs at most once
    /// per record; a failed or hung release is logged and abandoned.
    pub async fn dispose(&self, limit: Duration) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        release(self.device.as_ref(), limit).await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            bail!("{} is already released", self.device_id);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            device_id: self.device_id.clone(),
            name: self.name(),
            is_target: self.is_target(),
            brightness: self.brightness(),
        }
    }
}

/// Releases a device handle, giving up after `limit`.
pub async fn release(device: &dyn MonitorDevice, limit: Duration) {
    match timeout(limit, device.dispose()).await {
        Ok(Ok(())) => debug!("Released {}", device.id()),
        Ok(Err(e)) => warn!("Failed to dispose {}: {e}", device.id()),
        Err(_) => warn!("Failed to dispose {}: timed out after {limit:?}", device.id()),
    }
}
