// Wire types for the switch management API.
//
// Firmware revisions disagree on field spellings and on whether flags are
// booleans, numbers or strings; the deserializers here accept all of them.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Flexible scalars ────────────────────────────────────────────────

fn flag_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "up" | "true" | "1" | "on" | "enable" | "enabled" | "yes" => Some(true),
            "down" | "false" | "0" | "off" | "disable" | "disabled" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(flag_from_value(&value).unwrap_or(false))
}

fn optional_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(flag_from_value(&value))
}

fn number_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn optional_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).and_then(|n| u16::try_from(n).ok()))
}

fn flexible_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    number_from_value(&value)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| de::Error::custom(format!("expected a port number, got {value}")))
}

fn flexible_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = Value::deserialize(deserializer)?;
    number_from_value(&value)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| de::Error::custom(format!("expected a vlan id, got {value}")))
}

fn label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Some endpoints return a single object for one id and an array for `all`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

// ── Login ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub login: LoginCredentials<'a>,
}

#[derive(Debug, Serialize)]
pub struct LoginCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub login: Option<LoginToken>,
}

#[derive(Debug, Deserialize)]
pub struct LoginToken {
    #[serde(default)]
    pub token: Option<String>,
}

// ── Device info ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeviceInfoEnvelope {
    #[serde(rename = "deviceInfo")]
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, deserialize_with = "label")]
    pub name: String,
    #[serde(default, deserialize_with = "label")]
    pub model: String,
    #[serde(rename = "serialNumber", alias = "serial", default, deserialize_with = "label")]
    pub serial_number: String,
    #[serde(rename = "swVer", alias = "swVersion", default, deserialize_with = "label")]
    pub sw_version: String,
}

// ── Port statistics ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PortStatsEnvelope {
    #[serde(rename = "switchStatsPort")]
    pub ports: OneOrMany<PortStatRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortStatRecord {
    /// Vendor API handle; unrelated to the chassis number on some firmware.
    #[serde(rename = "portId", alias = "portid", deserialize_with = "flexible_u32")]
    pub port_id: u32,
    #[serde(
        rename = "interfaceName",
        alias = "ifName",
        default,
        deserialize_with = "label"
    )]
    pub interface_name: String,
    #[serde(rename = "myDesc", alias = "description", default, deserialize_with = "label")]
    pub description: String,
    #[serde(rename = "linkStatus", default, deserialize_with = "flag")]
    pub link_up: bool,
    #[serde(default, deserialize_with = "label")]
    pub speed: String,
    #[serde(rename = "portVlanId", alias = "pvid", default, deserialize_with = "optional_u16")]
    pub pvid: Option<u16>,
    #[serde(rename = "poeEnable", default, deserialize_with = "flag")]
    pub poe_enabled: bool,
}

// ── Port config ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PortConfigEnvelope {
    #[serde(rename = "switchPortConfig")]
    pub config: PortConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(
        rename = "portVlanId",
        default,
        deserialize_with = "optional_u16",
        skip_serializing_if = "Option::is_none"
    )]
    pub port_vlan_id: Option<u16>,
    #[serde(
        rename = "poeEnable",
        default,
        deserialize_with = "optional_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub poe_enable: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PortConfigUpdate {
    #[serde(rename = "switchPortConfig")]
    pub config: PortConfig,
}

// ── VLANs ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VlanEnvelope {
    #[serde(rename = "switchConfigVlan")]
    pub vlans: OneOrMany<VlanRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VlanRecord {
    #[serde(rename = "vlanId", alias = "vlanid", deserialize_with = "flexible_u16")]
    pub vlan_id: u16,
    #[serde(default, deserialize_with = "label")]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VlanMembershipEnvelope {
    #[serde(rename = "vlanMembership")]
    pub membership: VlanMembership,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanMembership {
    #[serde(rename = "vlanid", alias = "vlanId", deserialize_with = "flexible_u16")]
    pub vlan_id: u16,
    #[serde(rename = "portMembers", default)]
    pub port_members: Vec<PortMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMember {
    #[serde(deserialize_with = "flexible_u32")]
    pub port: u32,
    #[serde(default, deserialize_with = "flag")]
    pub tagged: bool,
}

impl VlanMembership {
    pub fn contains(&self, port: u32) -> bool {
        self.port_members.iter().any(|m| m.port == port)
    }

    /// Adds `port` untagged; `false` when it was already a member.
    pub fn add_untagged(&mut self, port: u32) -> bool {
        if self.contains(port) {
            return false;
        }
        self.port_members.push(PortMember {
            port,
            tagged: false,
        });
        true
    }

    /// Removes `port`; `false` when it was not a member.
    pub fn remove(&mut self, port: u32) -> bool {
        let before = self.port_members.len();
        self.port_members.retain(|m| m.port != port);
        self.port_members.len() != before
    }
}
