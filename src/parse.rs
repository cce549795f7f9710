//! Screen-scrapers for the switch CLI tables.
//!
//! Every parser works line by line and skips whatever it does not recognise.
//! Port labels come as `a/b` or `a/b/c`; the chassis number is always the
//! last segment. All functions are pure, so parsing the same capture twice
//! yields the same records.

use std::collections::BTreeMap;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{SystemInfo, VlanMap};

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern}: {err}"),
    }
}

static SYSTEM_NAME: Lazy<Regex> = Lazy::new(|| compile(r"(?im)^\s*System Name\.+\s*(\S.*?)\s*$"));

static SYSTEM_MODEL: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?im)^\s*(?:System Model Identifier|Machine Model)\.+\s*(\S.*?)\s*$")
});

/// A port label at the start of a line followed by the rest of the row.
static PORT_ROW: Lazy<Regex> = Lazy::new(|| compile(r"^\s*(\d+/\d+(?:/\d+)?)\s+(.*)$"));

static SPEED: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(\d+(?:\.\d+)?\s*[GM]?)\s+(Full|Half)\b"));

static VLAN_ROW: Lazy<Regex> = Lazy::new(|| compile(r"^\s*(\d{1,4})\s+([\w\-]+)\s+\S"));

static VLAN_PORT_ROW: Lazy<Regex> =
    Lazy::new(|| compile(r"^\s*(\d+/\d+(?:/\d+)?)\s+(\d{1,4})(?:\s|$)"));

/// One row of the port-status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub logical_id: u32,
    pub label: String,
    pub link_up: bool,
    pub speed_label: String,
    /// Some firmware prints the PVID right after the link state.
    pub pvid: Option<u16>,
}

/// Chassis number of a label such as `1/0/7` or `0/7`.
pub fn chassis_number(label: &str) -> Option<u32> {
    label.rsplit('/').next()?.parse().ok()
}

/// Reads system name and model, keeping `prior` values for missing lines.
pub fn parse_sysinfo(text: &str, prior: &SystemInfo) -> SystemInfo {
    let system_name = SYSTEM_NAME
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| prior.system_name.clone());
    let system_model = SYSTEM_MODEL
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| prior.system_model.clone());
    SystemInfo {
        system_name,
        system_model,
    }
}

/// Parses `show port status all` style output.
pub fn parse_port_status(text: &str) -> Vec<PortStatus> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let Some(caps) = PORT_ROW.captures(line) else {
            continue;
        };
        let label = &caps[1];
        let rest = &caps[2];
        let Some(logical_id) = chassis_number(label) else {
            continue;
        };
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let Some(link_pos) = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case("up") || t.eq_ignore_ascii_case("down"))
        else {
            trace!("port status line without link state: {line:?}");
            continue;
        };
        let link_up = tokens[link_pos].eq_ignore_ascii_case("up");
        let pvid = tokens
            .get(link_pos + 1)
            .and_then(|t| t.parse::<u16>().ok())
            .filter(|v| (1..=4094).contains(v));
        let speed_label = SPEED
            .captures(rest)
            .map(|c| format!("{} {}", c[1].trim(), &c[2]))
            .unwrap_or_default();
        rows.push(PortStatus {
            logical_id,
            label: label.to_string(),
            link_up,
            speed_label,
            pvid,
        });
    }
    rows
}

/// Largest chassis number seen in a port-status capture.
pub fn max_port_id(rows: &[PortStatus]) -> u32 {
    rows.iter().map(|r| r.logical_id).max().unwrap_or(0)
}

/// Decides the port count from a status table's highest id.
///
/// A truncated table would understate the device, so the observed maximum
/// only replaces `known` when it covers more than half of it.
pub fn accept_port_signal(observed_max: u32, known: u32) -> u32 {
    if observed_max > 0 && u64::from(observed_max) * 2 > u64::from(known) {
        observed_max
    } else {
        known
    }
}

/// Parses `show poe` output into chassis number -> powered.
pub fn parse_poe(text: &str) -> BTreeMap<u32, bool> {
    let mut poe = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = PORT_ROW.captures(line) else {
            continue;
        };
        let Some(logical_id) = chassis_number(&caps[1]) else {
            continue;
        };
        let mut tokens = caps[2].split_whitespace();
        let (Some(admin), Some(oper)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let admin_enabled = if admin.eq_ignore_ascii_case("enable") {
            true
        } else if admin.eq_ignore_ascii_case("disable") {
            false
        } else {
            continue;
        };
        let powered = match oper.to_ascii_lowercase().as_str() {
            "on" => true,
            "off" | "searching" | "fault" => false,
            // Firmware that prints the drawn power instead of an oper state.
            watts => match watts.parse::<f32>() {
                Ok(w) => admin_enabled && w > 0.0,
                Err(_) => continue,
            },
        };
        poe.insert(logical_id, powered);
    }
    poe
}

/// Parses `show vlan` output into a VLAN name table.
pub fn parse_vlan_names(text: &str) -> VlanMap {
    let mut names = VlanMap::new();
    for line in text.lines() {
        let Some(caps) = VLAN_ROW.captures(line) else {
            continue;
        };
        let Ok(id) = caps[1].parse::<u16>() else {
            continue;
        };
        if !(1..=4094).contains(&id) {
            continue;
        }
        names.insert(id, caps[2].to_string());
    }
    names
}

/// Parses `show vlan port all` output into chassis number -> PVID.
pub fn parse_vlan_ports(text: &str) -> BTreeMap<u32, u16> {
    let mut pvids = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = VLAN_PORT_ROW.captures(line) else {
            continue;
        };
        let (Some(logical_id), Ok(pvid)) = (chassis_number(&caps[1]), caps[2].parse::<u16>())
        else {
            continue;
        };
        pvids.insert(logical_id, pvid);
    }
    pvids
}

/// Model substrings and the port count they imply, most specific first.
///
/// Counts include uplinks: a 28G has 24 copper ports plus four SFP+.
const MODEL_PORT_TABLE: &[(&str, u32)] = &[
    ("96X", 96),
    ("24X24F", 48),
    ("48X", 48),
    ("52G", 52),
    ("12X12F", 24),
    ("28G", 28),
    ("24X", 24),
    ("8X8F", 16),
    ("16X", 16),
];

/// Port count implied by a model string; 48 when nothing matches.
pub fn port_count_for_model(model: &str) -> u32 {
    let upper = model.to_ascii_uppercase();
    MODEL_PORT_TABLE
        .iter()
        .find(|(needle, _)| upper.contains(needle))
        .map(|(_, count)| *count)
        .unwrap_or(crate::fleet::DEFAULT_PORT_COUNT)
}
