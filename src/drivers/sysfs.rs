//! Kernel backlight class devices (`/sys/class/backlight/*`).
//!
//! Values are exposed as percentages of `max_brightness`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, warn};

use crate::device::{DeviceEnumerator, MonitorDevice};

pub struct SysfsEnumerator {
    root: PathBuf,
}

impl SysfsEnumerator {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl DeviceEnumerator for SysfsEnumerator {
    async fn enumerate(&self) -> Result<Vec<Box<dyn MonitorDevice>>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || probe(&root))
            .await
            .context("Backlight probe task failed")?
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}

fn probe(root: &Path) -> Result<Vec<Box<dyn MonitorDevice>>> {
    let mut entries: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let path = entry.path();
            let id = entry.file_name().to_string_lossy().into_owned();
            match read_value(&path.join("max_brightness")) {
                Ok(0) => {
                    warn!("Skipping backlight {id}: max_brightness is 0");
                    None
                }
                Ok(max) => {
                    debug!("Found backlight {id} (max {max})");
                    Some(Box::new(SysfsBacklight {
                        id,
                        inner: Arc::new(Inner {
                            path,
                            max,
                            closed: AtomicBool::new(false),
                        }),
                    }) as Box<dyn MonitorDevice>)
                }
                Err(e) => {
                    warn!("Skipping backlight {id}: {e:#}");
                    None
                }
            }
        })
        .collect())
}

fn read_value(path: &Path) -> Result<u32> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .trim()
        .parse()
        .with_context(|| format!("Invalid value in {}", path.display()))
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    max: u32,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("{} is disposed", self.path.display());
        }
        Ok(())
    }

    fn to_percent(&self, raw: u32) -> i32 {
        ((f64::from(raw) * 100.0 / f64::from(self.max)).round() as i32).clamp(0, 100)
    }

    fn to_raw(&self, percent: i32) -> u32 {
        (f64::from(percent.clamp(0, 100)) * f64::from(self.max) / 100.0).round() as u32
    }
}

#[derive(Debug)]
pub struct SysfsBacklight {
    id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl MonitorDevice for SysfsBacklight {
    fn id(&self) -> &str {
        &self.id
    }

    async fn brightness(&self) -> Result<i32> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            inner.ensure_open()?;
            read_value(&inner.path.join("brightness")).map(|raw| inner.to_percent(raw))
        })
        .await
        .map_err(|e| anyhow!("{e}"))?
    }

    async fn set_brightness(&self, value: i32) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            inner.ensure_open()?;
            let path = inner.path.join("brightness");
            fs::write(&path, inner.to_raw(value).to_string())
                .with_context(|| format!("Failed to write {}", path.display()))
        })
        .await
        .map_err(|e| anyhow!("{e}"))?
    }

    async fn dispose(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}
