//! Fleet polling.
//!
//! A cycle walks the fleet in batches. Devices in a batch are polled
//! concurrently, each in its own task; batches run one after another.
//! For each device the poller probes the OOB and trunk addresses, fetches
//! through the first reachable one (OOB first) and publishes the result.
//! A fetch failure marks that path unreachable and falls through to the
//! other. When no path works, the previous port data is republished with
//! the new connectivity so consumers see the device as degraded.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use crate::channel::{DeviceChannel, DeviceReading, FetchContext, FleetChannels};
use crate::config::PollSettings;
use crate::fleet::{Device, Fleet};
use crate::model::{ActivePath, Connectivity, DeviceSnapshot};
use crate::store::SnapshotStore;

/// How one device fared in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A full snapshot was published from this path.
    Fresh(ActivePath),
    /// No path answered the probe.
    Unreachable,
    /// Probes answered but every fetch failed in transit; holds the last error.
    FetchFailed(String),
    /// The device answered but refused or garbled the fetch, e.g. bad
    /// credentials or an unreadable payload. Switching paths will not help.
    Rejected(String),
    /// The device's task panicked; its cache entry was left alone.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Outcome per device, ordered by device name.
    pub outcomes: Vec<(String, PollOutcome)>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn fresh(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PollOutcome::Fresh(_)))
            .count()
    }

    pub fn outcome(&self, device: &str) -> Option<&PollOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, o)| o)
    }
}

/// Polls one device and publishes whatever it learned.
pub async fn poll_device<C: DeviceChannel>(
    store: &SnapshotStore,
    device: &Device,
    channel: &C,
) -> PollOutcome {
    let prior = match store.get(&device.name).await {
        Some(snapshot) => snapshot,
        None => Arc::new(DeviceSnapshot::pending(device)),
    };
    let trunk = device.trunk_address.as_deref();

    let (oob_reachable, trunk_reachable) = tokio::join!(
        channel.probe(device, &device.oob_address),
        async {
            match trunk {
                Some(address) => channel.probe(device, address).await,
                None => false,
            }
        }
    );
    let mut connectivity = Connectivity {
        oob_reachable,
        trunk_reachable,
        active_path: ActivePath::None,
    };
    debug!(
        "{}: oob {} trunk {}",
        device.name, oob_reachable, trunk_reachable
    );

    let mut last_error = None;
    // Each failed attempt marks its path unreachable, so this tries OOB then
    // trunk at most once each.
    loop {
        let path = connectivity.preferred_path();
        let address = match path {
            ActivePath::Oob => device.oob_address.as_str(),
            ActivePath::Trunk => match trunk {
                Some(address) => address,
                None => {
                    connectivity.mark_unreachable(path);
                    continue;
                }
            },
            ActivePath::None => break,
        };
        connectivity.active_path = path;
        let ctx = FetchContext {
            device,
            address,
            prior: &prior,
        };
        match channel.fetch_snapshot(ctx).await {
            Ok(reading) => {
                let snapshot = merge_reading(device, &prior, reading, connectivity, address);
                store.publish(&device.name, snapshot).await;
                return PollOutcome::Fresh(path);
            }
            Err(err) => {
                if err.is_transport() {
                    warn!("{}: fetch via {address} failed: {err}", device.name);
                } else {
                    error!("{}: {address} rejected the fetch: {err}", device.name);
                }
                connectivity.mark_unreachable(path);
                last_error = Some(err);
            }
        }
    }

    connectivity.active_path = ActivePath::None;
    store
        .publish(&device.name, prior.with_connectivity(connectivity))
        .await;
    match last_error {
        Some(err) if err.is_transport() => PollOutcome::FetchFailed(err.to_string()),
        Some(err) => PollOutcome::Rejected(err.to_string()),
        None => PollOutcome::Unreachable,
    }
}

/// Builds the next snapshot from a fresh reading.
///
/// Ports are replaced wholesale; VLAN names already known are kept and only
/// new ids are added.
pub fn merge_reading(
    device: &Device,
    prior: &DeviceSnapshot,
    reading: DeviceReading,
    connectivity: Connectivity,
    address: &str,
) -> DeviceSnapshot {
    let mut vlan_map = prior.vlan_map.clone();
    for (id, name) in reading.vlan_names {
        vlan_map.entry(id).or_insert(name);
    }
    let mut snapshot = DeviceSnapshot {
        ports: reading.ports,
        vlan_map,
        connectivity,
        system_name: reading
            .system
            .system_name
            .unwrap_or_else(|| prior.system_name.clone()),
        system_model: reading
            .system
            .system_model
            .unwrap_or_else(|| prior.system_model.clone()),
        derived_port_count: reading.derived_port_count,
        active_address: Some(address.to_string()),
    };
    snapshot.fill_ports(device);
    snapshot
}

pub struct Poller<C = FleetChannels> {
    fleet: Arc<Fleet>,
    store: SnapshotStore,
    channel: Arc<C>,
    settings: PollSettings,
}

impl<C: DeviceChannel + 'static> Poller<C> {
    pub fn new(fleet: Arc<Fleet>, store: SnapshotStore, channel: Arc<C>, settings: PollSettings) -> Self {
        Self {
            fleet,
            store,
            channel,
            settings,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Polls every device once.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.fleet.len());

        for batch in self.fleet.devices().chunks(self.settings.batch_size.max(1)) {
            let mut unfinished: BTreeSet<String> = batch.iter().map(|d| d.name.clone()).collect();
            let mut tasks = JoinSet::new();
            for device in batch {
                let device = device.clone();
                let store = self.store.clone();
                let channel = Arc::clone(&self.channel);
                tasks.spawn(async move {
                    let outcome = poll_device(&store, &device, channel.as_ref()).await;
                    (device.name, outcome)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, outcome)) => {
                        unfinished.remove(&name);
                        outcomes.push((name, outcome));
                    }
                    Err(err) => error!("device poll task failed: {err}"),
                }
            }
            outcomes.extend(unfinished.into_iter().map(|name| (name, PollOutcome::Aborted)));
        }

        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let report = CycleReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            "poll cycle: {}/{} devices fresh in {:.1}s",
            report.fresh(),
            report.outcomes.len(),
            report.elapsed.as_secs_f64()
        );
        report
    }

    /// Runs cycles until `shutdown` resolves; returns the number of cycles run.
    ///
    /// A cycle in progress is finished before stopping. The cooldown is
    /// measured from the end of each cycle.
    pub async fn run_until<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycles = 0;
        loop {
            self.run_cycle().await;
            cycles += 1;
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.settings.cooldown()) => {}
            }
        }
        info!("poller stopped after {cycles} cycles");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Port, SystemInfo, VlanMap};
    use std::collections::BTreeMap;

    #[test]
    fn merge_keeps_known_vlan_names_and_fills_ports() {
        let device = Device::new("sw", "10.0.0.1").with_port_count_hint(48);
        let mut prior = DeviceSnapshot::pending(&device);
        prior.vlan_map.insert(10, "Cameras".to_string());

        let mut ports = BTreeMap::new();
        let mut port = Port::unknown(2, device.port_label(2));
        port.link_up = true;
        ports.insert(2, port);
        let mut vlan_names = VlanMap::new();
        vlan_names.insert(10, "Renamed".to_string());
        vlan_names.insert(20, "Voice".to_string());

        let reading = DeviceReading {
            system: SystemInfo {
                system_name: Some("edge".to_string()),
                system_model: None,
            },
            derived_port_count: 24,
            ports,
            vlan_names,
        };
        let connectivity = Connectivity {
            oob_reachable: true,
            trunk_reachable: false,
            active_path: ActivePath::Oob,
        };
        let next = merge_reading(&device, &prior, reading, connectivity, "10.0.0.1");

        assert_eq!(next.ports.len(), 24);
        assert!(next.ports[&2].link_up);
        assert_eq!(next.vlan_map[&10], "Cameras");
        assert_eq!(next.vlan_map[&20], "Voice");
        assert_eq!(next.system_name, "edge");
        assert_eq!(next.system_model, prior.system_model);
        assert_eq!(next.active_address.as_deref(), Some("10.0.0.1"));
    }
}
