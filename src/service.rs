//! Operations exposed to the HTTP layer.
//!
//! Reads come straight from the [`SnapshotStore`]. Changes go to the device
//! right away and, once the device accepts them, are written into the cache
//! so readers see them before the next poll confirms or corrects them.

use std::sync::Arc;

use log::info;

use crate::channel::{ConfigChange, ConfigOutcome, ConfigTarget, DeviceChannel, FleetChannels};
use crate::error::CommandError;
use crate::fleet::{Device, Fleet};
use crate::model::DeviceSnapshot;
use crate::store::SnapshotStore;

/// Highest VLAN id accepted for a port PVID.
pub const MAX_VLAN_ID: u16 = 4093;

pub struct FleetService<C = FleetChannels> {
    fleet: Arc<Fleet>,
    store: SnapshotStore,
    channel: Arc<C>,
}

impl<C: DeviceChannel> FleetService<C> {
    pub fn new(fleet: Arc<Fleet>, store: SnapshotStore, channel: Arc<C>) -> Self {
        Self {
            fleet,
            store,
            channel,
        }
    }

    pub fn list_switches(&self) -> &[Device] {
        self.fleet.devices()
    }

    /// The cached snapshot, or a pending one for a device not polled yet.
    pub async fn get_snapshot(&self, device: &str) -> Result<Arc<DeviceSnapshot>, CommandError> {
        let entry = self.device(device)?;
        Ok(self.snapshot_of(entry).await)
    }

    pub async fn set_vlan(
        &self,
        device: &str,
        port: u32,
        vlan: u16,
    ) -> Result<ConfigOutcome, CommandError> {
        if !(1..=MAX_VLAN_ID).contains(&vlan) {
            return Err(CommandError::InvalidVlan(vlan));
        }
        let entry = self.device(device)?;
        let outcome = self
            .apply(entry, port, ConfigChange::SetVlan { port, vlan })
            .await?;
        self.store
            .patch_port(entry, port, |p| p.vlan_id = Some(vlan))
            .await;
        info!("{device}: port {port} set to vlan {vlan}");
        Ok(outcome)
    }

    pub async fn cycle_poe(&self, device: &str, port: u32) -> Result<ConfigOutcome, CommandError> {
        let entry = self.device(device)?;
        let outcome = self.apply(entry, port, ConfigChange::CyclePoe { port }).await?;
        self.store
            .patch_port(entry, port, |p| p.poe_enabled = true)
            .await;
        info!("{device}: port {port} power cycled");
        Ok(outcome)
    }

    /// Runs raw CLI lines as one block and returns the device's echo.
    pub async fn run_cli_block(&self, device: &str, block: &str) -> Result<String, CommandError> {
        let entry = self.device(device)?;
        let snapshot = self.snapshot_of(entry).await;
        let target = ConfigTarget {
            device: entry,
            address: target_address(entry, &snapshot),
            port_count: snapshot.derived_port_count,
        };
        let change = ConfigChange::RawBlock(block.to_string());
        match self.channel.apply_config(target, &change).await? {
            ConfigOutcome::BlockApplied { output } => Ok(output),
            _ => Ok(String::new()),
        }
    }

    async fn apply(
        &self,
        device: &Device,
        port: u32,
        change: ConfigChange,
    ) -> Result<ConfigOutcome, CommandError> {
        let snapshot = self.snapshot_of(device).await;
        let max = snapshot.derived_port_count;
        if !(1..=max).contains(&port) {
            return Err(CommandError::InvalidPort {
                device: device.name.clone(),
                port,
                max,
            });
        }
        let target = ConfigTarget {
            device,
            address: target_address(device, &snapshot),
            port_count: max,
        };
        self.channel.apply_config(target, &change).await
    }

    fn device(&self, name: &str) -> Result<&Device, CommandError> {
        self.fleet
            .get(name)
            .ok_or_else(|| CommandError::UnknownDevice(name.to_string()))
    }

    async fn snapshot_of(&self, device: &Device) -> Arc<DeviceSnapshot> {
        match self.store.get(&device.name).await {
            Some(snapshot) => snapshot,
            None => Arc::new(DeviceSnapshot::pending(device)),
        }
    }
}

/// The address the last poll used, else OOB.
fn target_address<'a>(device: &'a Device, snapshot: &'a DeviceSnapshot) -> &'a str {
    snapshot
        .active_address
        .as_deref()
        .unwrap_or(device.oob_address.as_str())
}
