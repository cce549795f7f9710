//! Parsed device state: ports, VLAN names, connectivity and the per-device
//! snapshot the cache hands out.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::fleet::Device;

/// VLAN id to VLAN name. Names are kept for the device's lifetime once seen.
pub type VlanMap = BTreeMap<u16, String>;

pub const UNKNOWN_SYSTEM_NAME: &str = "Unknown Switch";
pub const UNKNOWN_SYSTEM_MODEL: &str = "Unknown Model";

/// One chassis port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Port {
    /// Chassis number, the last segment of the printed label.
    pub logical_id: u32,
    /// Full chassis label, e.g. `1/0/7`.
    pub label: String,
    /// Vendor API handle resolved during the session that produced this record.
    pub api_id: Option<u32>,
    pub link_up: bool,
    pub poe_enabled: bool,
    /// Current PVID.
    pub vlan_id: Option<u16>,
    pub description: String,
    pub speed_label: String,
}

impl Port {
    /// The down/unknown record used for ports a device did not report.
    pub fn unknown(logical_id: u32, label: String) -> Self {
        Self {
            logical_id,
            label,
            api_id: None,
            link_up: false,
            poe_enabled: false,
            vlan_id: None,
            description: String::new(),
            speed_label: String::new(),
        }
    }
}

/// Which address the current cycle uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivePath {
    Oob,
    Trunk,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Connectivity {
    pub oob_reachable: bool,
    pub trunk_reachable: bool,
    pub active_path: ActivePath,
}

impl Connectivity {
    pub fn mark_unreachable(&mut self, path: ActivePath) {
        match path {
            ActivePath::Oob => self.oob_reachable = false,
            ActivePath::Trunk => self.trunk_reachable = false,
            ActivePath::None => {}
        }
        if self.active_path == path {
            self.active_path = ActivePath::None;
        }
    }

    /// OOB wins whenever it is reachable.
    pub fn preferred_path(&self) -> ActivePath {
        if self.oob_reachable {
            ActivePath::Oob
        } else if self.trunk_reachable {
            ActivePath::Trunk
        } else {
            ActivePath::None
        }
    }
}

/// System identity read from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SystemInfo {
    pub system_name: Option<String>,
    pub system_model: Option<String>,
}

/// Cache entry for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceSnapshot {
    pub ports: BTreeMap<u32, Port>,
    pub vlan_map: VlanMap,
    pub connectivity: Connectivity,
    pub system_name: String,
    pub system_model: String,
    pub derived_port_count: u32,
    /// Address the last successful fetch used; `None` while unreachable.
    pub active_address: Option<String>,
}

impl DeviceSnapshot {
    /// Placeholder for a device that has not been reached yet.
    pub fn pending(device: &Device) -> Self {
        let mut snapshot = Self {
            ports: BTreeMap::new(),
            vlan_map: VlanMap::new(),
            connectivity: Connectivity::default(),
            system_name: UNKNOWN_SYSTEM_NAME.to_string(),
            system_model: UNKNOWN_SYSTEM_MODEL.to_string(),
            derived_port_count: device.port_count_hint,
            active_address: None,
        };
        snapshot.fill_ports(device);
        snapshot
    }

    /// Makes `ports` hold exactly the keys `1..=derived_port_count`.
    pub fn fill_ports(&mut self, device: &Device) {
        let count = self.derived_port_count;
        self.ports.retain(|id, _| (1..=count).contains(id));
        for id in 1..=count {
            self.ports
                .entry(id)
                .or_insert_with(|| Port::unknown(id, device.port_label(id)));
        }
    }

    /// Keeps port data and identity, replaces connectivity.
    pub fn with_connectivity(&self, connectivity: Connectivity) -> Self {
        let mut next = self.clone();
        next.connectivity = connectivity;
        next.active_address = None;
        next
    }
}
