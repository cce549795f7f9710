//! CLI scripts for the switch firmware.
//!
//! The read script captures the five tables the parsers understand. The
//! configuration builders produce blocks for [`Script::ConfigBlock`]; each
//! block enters global config, does its work and exits back to the
//! privileged prompt so the automaton can see completion.

use crate::automaton::{CaptureStep, Script};

pub const SLOT_SYSINFO: &str = "sysinfo";
pub const SLOT_STATUS_ALL: &str = "status-all";
pub const SLOT_POE: &str = "poe";
pub const SLOT_VLAN: &str = "vlan";
pub const SLOT_VLAN_PORT_ALL: &str = "vlan-port-all";

/// Slot names and commands of the poll script, in execution order.
pub const POLL_COMMANDS: &[(&str, &str)] = &[
    (SLOT_SYSINFO, "show sysinfo"),
    (SLOT_STATUS_ALL, "show port status all"),
    (SLOT_POE, "show poe"),
    (SLOT_VLAN, "show vlan"),
    (SLOT_VLAN_PORT_ALL, "show vlan port all"),
];

/// The read script run once per poll cycle on interactive devices.
pub fn poll_script() -> Script {
    Script::Capture(
        POLL_COMMANDS
            .iter()
            .map(|(slot, command)| CaptureStep::new(*slot, *command))
            .collect(),
    )
}

/// Sets the PVID of one port and makes it an untagged member of that VLAN.
pub fn set_vlan_block(label: &str, vlan: u16) -> String {
    interface_block(
        label,
        &[
            format!("vlan pvid {vlan}"),
            format!("vlan participation include {vlan}"),
        ],
    )
}

pub fn poe_disable_block(label: &str) -> String {
    interface_block(label, &["no poe".to_string()])
}

pub fn poe_enable_block(label: &str) -> String {
    interface_block(label, &["poe".to_string()])
}

fn interface_block(label: &str, lines: &[String]) -> String {
    let mut block = vec!["configure".to_string(), format!("interface {label}")];
    block.extend(lines.iter().cloned());
    block.push("exit".to_string());
    block.push("exit".to_string());
    block.join("\n")
}

/// Normalizes a caller-supplied block: CRLF to LF, blank lines dropped,
/// surrounding whitespace trimmed per line. `None` when nothing is left.
pub fn normalize_raw_block(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_script_captures_five_tables_in_order() {
        let Script::Capture(steps) = poll_script() else {
            panic!("poll script should capture");
        };
        let slots: Vec<&str> = steps.iter().map(|s| s.slot.as_str()).collect();
        assert_eq!(
            slots,
            vec!["sysinfo", "status-all", "poe", "vlan", "vlan-port-all"]
        );
        assert_eq!(steps[4].command, "show vlan port all");
    }

    #[test]
    fn set_vlan_block_returns_to_privileged_mode() {
        let block = set_vlan_block("1/0/7", 30);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "configure");
        assert_eq!(lines[1], "interface 1/0/7");
        assert!(lines.contains(&"vlan pvid 30"));
        assert!(lines.contains(&"vlan participation include 30"));
        assert_eq!(&lines[lines.len() - 2..], &["exit", "exit"]);
    }

    #[test]
    fn poe_blocks_toggle_power() {
        assert!(poe_disable_block("0/4").contains("\nno poe\n"));
        assert!(poe_enable_block("0/4").contains("\npoe\n"));
    }

    #[test]
    fn raw_block_is_normalized() {
        assert_eq!(
            normalize_raw_block("  configure\r\n\r\n  snmp-server community x \r\nexit\n"),
            Some("configure\nsnmp-server community x\nexit".to_string())
        );
        assert_eq!(normalize_raw_block(" \n\t\n"), None);
    }
}
