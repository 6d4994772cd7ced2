//! Ordered, identity-keyed collection of live monitors.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Result, bail};
use tokio::sync::RwLock;

use crate::{
    device::{instance_matches, same_device},
    monitor::{MonitorRecord, MonitorSnapshot},
};

/// Registry of monitor records in insertion order.
///
/// Readers take cheap snapshots of the record list. Structural changes hold
/// the write lock only for the push or removal itself, so a reader never sees
/// a half-applied change. Record fields are updated without the lock.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    records: RwLock<Vec<Arc<MonitorRecord>>>,
    closed: AtomicBool,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current records in insertion order.
    pub async fn snapshot(&self) -> Vec<Arc<MonitorRecord>> {
        self.records.read().await.clone()
    }

    /// Presentation copies of every record.
    pub async fn describe(&self) -> Vec<MonitorSnapshot> {
        self.records
            .read()
            .await
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn find(&self, device_id: &str) -> Option<Arc<MonitorRecord>> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| same_device(record.device_id(), device_id))
            .cloned()
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.find(device_id).await.is_some()
    }

    /// Finds the first record whose identity prefixes `instance_name`.
    pub async fn find_by_instance(&self, instance_name: &str) -> Option<Arc<MonitorRecord>> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| instance_matches(instance_name, record.device_id()))
            .cloned()
    }

    pub async fn targets(&self) -> Vec<Arc<MonitorRecord>> {
        self.records
            .read()
            .await
            .iter()
            .filter(|record| record.is_target())
            .cloned()
            .collect()
    }

    /// Appends a record. Duplicate identities and inserts after
    /// [`close`](Self::close) are rejected.
    pub async fn insert(&self, record: Arc<MonitorRecord>) -> Result<()> {
        let mut records = self.records.write().await;
        if self.closed.load(Ordering::Acquire) {
            bail!("Registry is closed, rejecting {}", record.device_id());
        }
        if records
            .iter()
            .any(|existing| same_device(existing.device_id(), record.device_id()))
        {
            bail!("Monitor {} is already registered", record.device_id());
        }
        records.push(record);
        Ok(())
    }

    /// Removes and returns the record with the given identity.
    pub async fn remove(&self, device_id: &str) -> Option<Arc<MonitorRecord>> {
        let mut records = self.records.write().await;
        let idx = records
            .iter()
            .position(|record| same_device(record.device_id(), device_id))?;
        Some(records.remove(idx))
    }

    /// Empties the registry for good, returning the records in order.
    pub async fn close(&self) -> Vec<Arc<MonitorRecord>> {
        let mut records = self.records.write().await;
        self.closed.store(true, Ordering::Release);
        std::mem::take(&mut *records)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceEnumerator, mock::MockHardware};
    use pretty_assertions::assert_eq;

    async fn records(ids: &[&str]) -> Vec<Arc<MonitorRecord>> {
        let hardware = MockHardware::with_panels(ids);
        hardware
            .enumerator()
            .enumerate()
            .await
            .unwrap()
            .into_iter()
            .map(|device| Arc::new(MonitorRecord::new(device)))
            .collect()
    }

    fn ids(records: &[Arc<MonitorRecord>]) -> Vec<String> {
        records.iter().map(|r| r.device_id().to_string()).collect()
    }

    #[tokio::test]
    async fn insert_keeps_order() {
        let registry = MonitorRegistry::new();
        for record in records(&["D1", "D2", "D3"]).await {
            registry.insert(record).await.unwrap();
        }

        assert_eq!(ids(&registry.snapshot().await), vec!["D1", "D2", "D3"]);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn insert_rejects_case_insensitive_duplicate() {
        let registry = MonitorRegistry::new();
        let mut batch = records(&["Mon-A", "mon-a"]).await;
        let second = batch.pop().unwrap();
        let first = batch.pop().unwrap();

        registry.insert(first).await.unwrap();
        let result = registry.insert(second).await;

        assert!(result.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_by_identity() {
        let registry = MonitorRegistry::new();
        for record in records(&["D1", "D2", "D3"]).await {
            registry.insert(record).await.unwrap();
        }

        let removed = registry.remove("d2").await.unwrap();

        assert_eq!(removed.device_id(), "D2");
        assert_eq!(ids(&registry.snapshot().await), vec!["D1", "D3"]);
        assert!(registry.remove("D2").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_is_stable_across_mutation() {
        let registry = MonitorRegistry::new();
        for record in records(&["D1", "D2"]).await {
            registry.insert(record).await.unwrap();
        }

        let before = registry.snapshot().await;
        registry.remove("D1").await;

        assert_eq!(ids(&before), vec!["D1", "D2"]);
        assert_eq!(ids(&registry.snapshot().await), vec!["D2"]);
    }

    #[tokio::test]
    async fn find_by_instance_uses_prefix() {
        let registry = MonitorRegistry::new();
        for record in records(&["DISPLAY\\DEL4321\\5&1", "DISPLAY\\GSM5B7F\\4&2"]).await {
            registry.insert(record).await.unwrap();
        }

        let found = registry
            .find_by_instance("display\\gsm5b7f\\4&2_0")
            .await
            .unwrap();
        assert_eq!(found.device_id(), "DISPLAY\\GSM5B7F\\4&2");
        assert!(registry.find_by_instance("DISPLAY\\ACR").await.is_none());
    }

    #[tokio::test]
    async fn targets_filters_flag() {
        let registry = MonitorRegistry::new();
        for (idx, record) in records(&["D1", "D2", "D3"]).await.into_iter().enumerate() {
            record.set_target(idx != 1);
            registry.insert(record).await.unwrap();
        }

        assert_eq!(ids(&registry.targets().await), vec!["D1", "D3"]);
    }

    #[tokio::test]
    async fn close_empties_registry() {
        let registry = MonitorRegistry::new();
        for record in records(&["D1", "D2"]).await {
            registry.insert(record).await.unwrap();
        }

        let drained = registry.close().await;

        assert_eq!(ids(&drained), vec!["D1", "D2"]);
        assert!(registry.is_empty().await);
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn insert_after_close_is_rejected() {
        let registry = MonitorRegistry::new();
        let mut batch = records(&["D1", "D2"]).await;
        registry.insert(batch.remove(0)).await.unwrap();
        registry.close().await;

        let err = registry.insert(batch.remove(0)).await.unwrap_err();

        assert!(err.to_string().contains("closed"));
        assert!(registry.is_empty().await);
        assert!(registry.close().await.is_empty());
    }
}
