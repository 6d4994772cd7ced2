//! Remembered display names for monitors that come and go.
//!
//! Names are written when a monitor record is disposed and read back when a
//! device with the same identity shows up again. The cache is bounded; the
//! entries modified longest ago are dropped first.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// One remembered name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub device_id: String,
    pub name: String,
    pub modified: SystemTime,
}

/// What [`NameCache::store`] did with a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameChange {
    Added,
    Modified,
    Removed,
    Unchanged,
}

/// Bounded identity → name cache.
///
/// Keys are folded to lowercase so lookups ignore case, matching how device
/// identities are compared everywhere else.
#[derive(Debug)]
pub struct NameCache {
    entries: DashMap<String, NameEntry>,
    capacity: usize,
}

fn cache_key(device_id: &str) -> String {
    device_id.to_ascii_lowercase()
}

impl NameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Builds a cache from persisted entries, evicting down to `capacity`.
    pub fn from_entries(entries: Vec<NameEntry>, capacity: usize) -> Self {
        let cache = Self::new(capacity);
        for entry in entries {
            if entry.name.trim().is_empty() {
                continue;
            }
            let key = cache_key(&entry.device_id);
            let newer = cache
                .entries
                .get(&key)
                .is_none_or(|existing| existing.modified < entry.modified);
            if newer {
                cache.entries.insert(key, entry);
            }
        }
        cache.truncate();
        cache
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the remembered name for a device.
    pub fn lookup(&self, device_id: &str) -> Option<String> {
        self.entries
            .get(&cache_key(device_id))
            .map(|entry| entry.name.clone())
    }

    /// Records the name a monitor carried when it was disposed.
    ///
    /// A non-empty name is added or overwritten with a fresh timestamp. An
    /// empty name forgets whatever was stored for the device.
    pub fn store(&self, device_id: &str, name: Option<&str>) -> NameChange {
        self.store_at(device_id, name, SystemTime::now())
    }

    pub fn store_at(&self, device_id: &str, name: Option<&str>, now: SystemTime) -> NameChange {
        let key = cache_key(device_id);
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let change = match (self.entries.contains_key(&key), name) {
            (false, None) => NameChange::Unchanged,
            (true, None) => {
                self.entries.remove(&key);
                NameChange::Removed
            }
            (exists, Some(name)) => {
                self.entries.insert(
                    key,
                    NameEntry {
                        device_id: device_id.to_string(),
                        name: name.to_string(),
                        modified: now,
                    },
                );
                if exists {
                    NameChange::Modified
                } else {
                    NameChange::Added
                }
            }
        };

        if change != NameChange::Unchanged {
            debug!("Name cache {change:?} for {device_id}");
        }
        self.truncate();
        change
    }

    /// Drops the oldest entries until the cache fits its capacity.
    ///
    /// Returns the identities that were evicted. Entries with equal
    /// timestamps are ordered by identity so eviction is deterministic.
    pub fn truncate(&self) -> Vec<String> {
        if self.entries.len() <= self.capacity {
            return Vec::new();
        }

        let evicted: Vec<String> = self
            .sorted_entries()
            .into_iter()
            .skip(self.capacity)
            .map(|entry| entry.device_id)
            .collect();

        for device_id in &evicted {
            self.entries.remove(&cache_key(device_id));
        }
        info!("Evicted {} remembered monitor names", evicted.len());
        evicted
    }

    /// Entries ordered newest first.
    pub fn sorted_entries(&self) -> Vec<NameEntry> {
        let mut entries: Vec<NameEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| cache_key(&a.device_id).cmp(&cache_key(&b.device_id)))
        });
        entries
    }
}

/// Persistence of the name cache across process lifetimes.
#[async_trait]
pub trait NameStore: Send + Sync {
    async fn load(&self) -> Result<Vec<NameEntry>>;
    async fn save(&self, entries: &[NameEntry]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct NameFile {
    version: u8,
    #[serde(default)]
    monitors: Vec<NameEntry>,
}

/// JSON file backed [`NameStore`].
#[derive(Debug, Clone)]
pub struct JsonNameStore {
    path: PathBuf,
}

impl JsonNameStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NameStore for JsonNameStore {
    async fn load(&self) -> Result<Vec<NameEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No name store at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read name store: {}", self.path.display())
                });
            }
        };

        let file: NameFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse name store: {}", self.path.display()))?;
        if file.version != 1 {
            bail!(
                "Unsupported name store version {} in file: {}",
                file.version,
                self.path.display()
            );
        }

        info!(
            "Loaded {} monitor names from {}",
            file.monitors.len(),
            self.path.display()
        );
        Ok(file.monitors)
    }

    async fn save(&self, entries: &[NameEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(&NameFile {
            version: 1,
            monitors: entries.to_vec(),
        })
        .context("Failed to serialize monitor names")?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move names to {}", self.path.display()))?;

        info!("Saved {} monitor names to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Loads the cache, falling back to an empty one when the store is unreadable.
pub async fn load_cache(store: &dyn NameStore, capacity: usize) -> NameCache {
    match store.load().await {
        Ok(entries) => NameCache::from_entries(entries, capacity),
        Err(e) => {
            warn!("Failed to load monitor names, starting empty: {e:#}");
            NameCache::new(capacity)
        }
    }
}
