#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use rfleet::channel::{
    ConfigChange, ConfigOutcome, ConfigTarget, DeviceChannel, DeviceReading, FetchContext,
};
use rfleet::error::{CommandError, ConnectError, MutationError, MutationStep};
use rfleet::fleet::Device;
use rfleet::model::{Port, SystemInfo, VlanMap};

/// In-process channel with scripted reachability and failures.
pub struct FakeChannel {
    port_count: u32,
    reachable: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    rejecting: HashSet<String>,
    panicking: HashSet<String>,
    apply_failure: Option<MutationStep>,
    fetches: Mutex<Vec<String>>,
    applied: Mutex<Vec<(String, ConfigChange)>>,
}

impl FakeChannel {
    pub fn new(port_count: u32) -> Self {
        Self {
            port_count,
            reachable: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            rejecting: HashSet::new(),
            panicking: HashSet::new(),
            apply_failure: None,
            fetches: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn reachable(self, addresses: &[&str]) -> Self {
        for address in addresses {
            self.set_reachable(address, true);
        }
        self
    }

    pub fn failing(self, address: &str) -> Self {
        self.failing
            .lock()
            .expect("lock")
            .insert(address.to_string());
        self
    }

    /// Fetches from `address` fail as if the device refused the login.
    pub fn rejecting(mut self, address: &str) -> Self {
        self.rejecting.insert(address.to_string());
        self
    }

    pub fn panicking(mut self, device: &str) -> Self {
        self.panicking.insert(device.to_string());
        self
    }

    pub fn failing_apply_at(mut self, step: MutationStep) -> Self {
        self.apply_failure = Some(step);
        self
    }

    pub fn set_reachable(&self, address: &str, up: bool) {
        let mut reachable = self.reachable.lock().expect("lock");
        if up {
            reachable.insert(address.to_string());
        } else {
            reachable.remove(address);
        }
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().expect("lock").clone()
    }

    pub fn applied(&self) -> Vec<(String, ConfigChange)> {
        self.applied.lock().expect("lock").clone()
    }

    fn reading(&self, device: &Device) -> DeviceReading {
        let mut ports = BTreeMap::new();
        for id in [1, self.port_count] {
            let mut port = Port::unknown(id, device.port_label(id));
            port.link_up = true;
            port.vlan_id = Some(10);
            ports.insert(id, port);
        }
        let mut vlan_names = VlanMap::new();
        vlan_names.insert(10, "Cameras".to_string());
        DeviceReading {
            system: SystemInfo {
                system_name: Some(device.name.to_uppercase()),
                system_model: Some("M4300-8X8F".to_string()),
            },
            derived_port_count: self.port_count,
            ports,
            vlan_names,
        }
    }
}

impl DeviceChannel for FakeChannel {
    async fn probe(&self, _device: &Device, address: &str) -> bool {
        self.reachable.lock().expect("lock").contains(address)
    }

    async fn fetch_snapshot(&self, ctx: FetchContext<'_>) -> Result<DeviceReading, ConnectError> {
        self.fetches
            .lock()
            .expect("lock")
            .push(ctx.address.to_string());
        if self.panicking.contains(&ctx.device.name) {
            panic!("firmware returned garbage for {}", ctx.device.name);
        }
        if self.failing.lock().expect("lock").contains(ctx.address) {
            return Err(ConnectError::Transport(format!("{} reset the connection", ctx.address)));
        }
        if self.rejecting.contains(ctx.address) {
            return Err(ConnectError::Auth(format!("{} refused the login", ctx.address)));
        }
        Ok(self.reading(ctx.device))
    }

    async fn apply_config(
        &self,
        target: ConfigTarget<'_>,
        change: &ConfigChange,
    ) -> Result<ConfigOutcome, CommandError> {
        self.applied
            .lock()
            .expect("lock")
            .push((target.address.to_string(), change.clone()));
        if let Some(step) = self.apply_failure {
            return Err(CommandError::PartialMutation {
                device: target.device.name.clone(),
                source: MutationError::new(
                    step,
                    ConnectError::ApiStatus {
                        status: 500,
                        body: "rejected".to_string(),
                    },
                ),
            });
        }
        Ok(match change {
            ConfigChange::SetVlan { port, .. } => ConfigOutcome::VlanSet {
                api_id: Some(*port),
                previous_pvid: Some(1),
            },
            ConfigChange::CyclePoe { port } => ConfigOutcome::PoeCycled {
                api_id: Some(*port),
            },
            ConfigChange::RawBlock(block) => ConfigOutcome::BlockApplied {
                output: format!("{block}\r\n(sw) #"),
            },
        })
    }
}

pub fn switch(name: &str, oob: &str, trunk: &str) -> Device {
    Device::new(name, oob)
        .with_trunk(trunk)
        .with_port_count_hint(8)
}
