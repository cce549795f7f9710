//! Static fleet configuration.
//!
//! The fleet is loaded once at startup and never mutated afterwards. The JSON
//! shape accepts both the native field names and the spellings used by the
//! switch inventory export (`ip_oob`, `ip_trunk`, `ports`).

use std::collections::HashSet;
use std::path::Path;

use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::PollSettings;
use crate::error::ConfigError;

/// Chassis label prefix used by stacked M4300-class units.
pub const DEFAULT_CHASSIS_PREFIX: &str = "1/0/";

/// Port count assumed when nothing better is known.
pub const DEFAULT_PORT_COUNT: u32 = 48;

fn default_chassis_prefix() -> String {
    DEFAULT_CHASSIS_PREFIX.to_string()
}

fn default_port_count() -> u32 {
    DEFAULT_PORT_COUNT
}

/// Which channel the poller uses for a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// HTTPS management API.
    #[default]
    Api,
    /// Interactive CLI over SSH (legacy path).
    Interactive,
}

/// One managed switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Device {
    pub name: String,
    #[serde(alias = "ip_oob")]
    pub oob_address: String,
    #[serde(alias = "ip_trunk", default)]
    pub trunk_address: Option<String>,
    #[serde(alias = "ports", default = "default_port_count")]
    pub port_count_hint: u32,
    #[serde(default)]
    pub channel: ChannelKind,
    #[serde(default = "default_chassis_prefix")]
    pub chassis_prefix: String,
}

impl Device {
    pub fn new(name: impl Into<String>, oob_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            oob_address: oob_address.into(),
            trunk_address: None,
            port_count_hint: DEFAULT_PORT_COUNT,
            channel: ChannelKind::default(),
            chassis_prefix: default_chassis_prefix(),
        }
    }

    pub fn with_trunk(mut self, trunk_address: impl Into<String>) -> Self {
        self.trunk_address = Some(trunk_address.into());
        self
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_port_count_hint(mut self, hint: u32) -> Self {
        self.port_count_hint = hint;
        self
    }

    /// Chassis label for a logical port, e.g. `1/0/7`.
    pub fn port_label(&self, logical_id: u32) -> String {
        format!("{}{}", self.chassis_prefix, logical_id)
    }
}

/// Top-level fleet file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FleetConfig {
    pub switches: Vec<Device>,
    /// When set, devices without a trunk address get `prefix + last OOB octet`.
    #[serde(default)]
    pub trunk_prefix: Option<String>,
    #[serde(default)]
    pub poll: PollSettings,
}

impl FleetConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.switches.is_empty() {
            return Err(ConfigError::Invalid("fleet has no switches".to_string()));
        }
        if self.poll.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.poll.port_stats_batch == 0 {
            return Err(ConfigError::Invalid(
                "port_stats_batch must be at least 1".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for device in &self.switches {
            if device.name.trim().is_empty() {
                return Err(ConfigError::Invalid("switch with empty name".to_string()));
            }
            if device.oob_address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "switch {} has no oob address",
                    device.name
                )));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate switch name {}",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Resolves derived trunk addresses and freezes the device list.
    pub fn into_fleet(self) -> Fleet {
        let prefix = self.trunk_prefix;
        let devices = self
            .switches
            .into_iter()
            .map(|mut device| {
                if device.trunk_address.is_none()
                    && let Some(prefix) = prefix.as_deref()
                {
                    device.trunk_address = derive_trunk_address(&device.oob_address, prefix);
                }
                device
            })
            .collect();
        Fleet { devices }
    }
}

/// `172.31.29.7` with prefix `172.29.10.` becomes `172.29.10.7`.
fn derive_trunk_address(oob: &str, prefix: &str) -> Option<String> {
    let last = oob.rsplit('.').next()?;
    if last.is_empty() || !last.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{prefix}{last}"))
}

/// The frozen device list.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    devices: Vec<Device>,
}

impl Fleet {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Login material shared by both channels.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// Answer to the `Password:` prompt after `enable`; the login password when unset.
    pub enable_password: Option<SecretString>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            enable_password: None,
        }
    }

    pub fn with_enable_password(mut self, enable: impl Into<String>) -> Self {
        self.enable_password = Some(SecretString::from(enable.into()));
        self
    }

    pub fn enable_secret(&self) -> &SecretString {
        self.enable_password.as_ref().unwrap_or(&self.password)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
