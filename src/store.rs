//! Process-wide snapshot cache.
//!
//! One [`SnapshotStore`] is created at startup and handed to both the poller
//! and the command service. Readers get `Arc`s to immutable snapshots; the
//! poller replaces a whole snapshot at a time and the service patches single
//! port fields through [`SnapshotStore::patch_port`]. Entries never expire.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::trace;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use crate::fleet::Device;
use crate::model::{DeviceSnapshot, Port};

#[derive(Clone)]
pub struct SnapshotStore {
    cache: Cache<String, Arc<DeviceSnapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    pub async fn get(&self, device: &str) -> Option<Arc<DeviceSnapshot>> {
        self.cache.get(device).await
    }

    /// Replaces the device's snapshot.
    pub async fn publish(&self, device: &str, snapshot: DeviceSnapshot) {
        trace!("publishing snapshot for {device}");
        self.cache
            .insert(device.to_string(), Arc::new(snapshot))
            .await;
    }

    /// Every cached snapshot, ordered by device name.
    pub fn all(&self) -> BTreeMap<String, Arc<DeviceSnapshot>> {
        self.cache
            .iter()
            .map(|(name, snapshot)| (name.as_ref().clone(), snapshot))
            .collect()
    }

    /// Applies `patch` to one port in place of a full poll.
    ///
    /// A device with no entry yet gets a pending snapshot first. Returns
    /// `false` when the port is outside the snapshot's port range.
    pub async fn patch_port<F>(&self, device: &Device, logical: u32, patch: F) -> bool
    where
        F: FnOnce(&mut Port) + Send,
    {
        let result = self
            .cache
            .entry(device.name.clone())
            .and_compute_with(|entry| {
                let mut snapshot = match entry {
                    Some(entry) => DeviceSnapshot::clone(&entry.into_value()),
                    None => DeviceSnapshot::pending(device),
                };
                let op = match snapshot.ports.get_mut(&logical) {
                    Some(port) => {
                        patch(port);
                        Op::Put(Arc::new(snapshot))
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_replaces_whole_snapshot() {
        let store = SnapshotStore::new();
        let device = Device::new("sw1", "10.0.0.1").with_port_count_hint(8);
        let mut snapshot = DeviceSnapshot::pending(&device);
        snapshot.system_name = "first".to_string();
        store.publish("sw1", snapshot.clone()).await;
        snapshot.system_name = "second".to_string();
        store.publish("sw1", snapshot).await;

        let cached = store.get("sw1").await.expect("cached");
        assert_eq!(cached.system_name, "second");
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn patch_creates_pending_entry_and_updates_port() {
        let store = SnapshotStore::new();
        let device = Device::new("sw1", "10.0.0.1").with_port_count_hint(8);

        assert!(store.patch_port(&device, 3, |p| p.vlan_id = Some(20)).await);
        let cached = store.get("sw1").await.expect("cached");
        assert_eq!(cached.ports[&3].vlan_id, Some(20));
        assert_eq!(cached.ports.len(), 8);
    }

    #[tokio::test]
    async fn patch_outside_port_range_is_a_no_op() {
        let store = SnapshotStore::new();
        let device = Device::new("sw1", "10.0.0.1").with_port_count_hint(8);
        store.publish("sw1", DeviceSnapshot::pending(&device)).await;

        assert!(!store.patch_port(&device, 9, |p| p.poe_enabled = true).await);
        let cached = store.get("sw1").await.expect("cached");
        assert!(!cached.ports.contains_key(&9));
    }

    #[tokio::test]
    async fn readers_keep_their_copy_across_patches() {
        let store = SnapshotStore::new();
        let device = Device::new("sw1", "10.0.0.1").with_port_count_hint(4);
        store.publish("sw1", DeviceSnapshot::pending(&device)).await;
        let before = store.get("sw1").await.expect("cached");

        store.patch_port(&device, 1, |p| p.link_up = true).await;

        assert!(!before.ports[&1].link_up);
        assert!(store.get("sw1").await.expect("cached").ports[&1].link_up);
    }
}
