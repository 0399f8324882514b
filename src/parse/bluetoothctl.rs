// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parsers for `bluetoothctl` output.

use super::{unreadable, usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;
use regex::Regex;
use shellsync_ipc::{BluetoothAdapter, Device};
use std::sync::OnceLock;

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("static regex"))
}

fn device_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Device ([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})(?: (.*))?$")
            .expect("static regex")
    })
}

/// Whether `address` is a colon-separated MAC address.
pub fn is_valid_address(address: &str) -> bool {
    address_re().is_match(address)
}

fn yes(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}

/// Parse `bluetoothctl show`.
///
/// `Parsed(None)` means the stack is up but there is no controller.
pub fn parse_adapter(out: &CommandOutput) -> ParseOutcome<Option<BluetoothAdapter>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };
    if text.contains("No default controller available") {
        return ParseOutcome::Parsed(None);
    }

    let mut adapter: Option<BluetoothAdapter> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Controller ") {
            let address = rest.split_whitespace().next().unwrap_or_default();
            adapter = Some(BluetoothAdapter {
                address: address.to_string(),
                ..Default::default()
            });
            continue;
        }
        let (Some(a), Some((key, value))) = (adapter.as_mut(), trimmed.split_once(':')) else {
            continue;
        };
        match key {
            "Name" => a.name = value.trim().to_string(),
            "Alias" if a.name.is_empty() => a.name = value.trim().to_string(),
            "Powered" => a.powered = yes(value),
            "Discovering" => a.discovering = yes(value),
            "Discoverable" => a.discoverable = yes(value),
            _ => {}
        }
    }

    match adapter {
        Some(a) => ParseOutcome::Parsed(Some(a)),
        None if text.trim().is_empty() => ParseOutcome::Parsed(None),
        None => unreadable("bluetoothctl show", out),
    }
}

/// Parse `Device <MAC> <name>` lines from any `devices` listing.
///
/// Other chatter (agent registration, `[NEW]` events) is ignored; output
/// with chatter but no device lines at all is treated as unreadable.
pub fn parse_device_list(out: &CommandOutput) -> ParseOutcome<Vec<Device>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };

    let devices: Vec<Device> = text
        .lines()
        .filter_map(|line| device_line_re().captures(line.trim()))
        .map(|caps| {
            let address = caps[1].to_ascii_uppercase();
            let name = caps
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|n| !n.is_empty() && n.replace('-', ":") != address)
                .unwrap_or(address.as_str())
                .to_string();
            Device::new(address.clone(), name)
        })
        .collect();

    if devices.is_empty() && !text.trim().is_empty() {
        return unreadable("bluetoothctl devices", out);
    }
    ParseOutcome::Parsed(devices)
}

/// Addresses from a device listing.
pub fn parse_addresses(out: &CommandOutput) -> ParseOutcome<Vec<String>> {
    parse_device_list(out).map(|devices| devices.into_iter().map(|d| d.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_adapter() {
        let text = "Controller 00:1A:7D:DA:71:13 (public)
\tName: thinkpad
\tAlias: thinkpad
\tClass: 0x006c010c
\tPowered: yes
\tDiscoverable: no
\tPairable: yes
\tDiscovering: no
";
        let adapter = parse_adapter(&CommandOutput::ok(text)).ok().flatten().unwrap();
        assert_eq!(adapter.address, "00:1A:7D:DA:71:13");
        assert_eq!(adapter.name, "thinkpad");
        assert!(adapter.powered);
        assert!(!adapter.discovering);
        assert!(!adapter.discoverable);
    }

    #[test]
    fn test_no_controller() {
        let out = CommandOutput::ok("No default controller available\n");
        assert_eq!(parse_adapter(&out), ParseOutcome::Parsed(None));
        assert!(parse_adapter(&CommandOutput::not_found("bluetoothctl")).is_empty());
    }

    #[test]
    fn test_parse_device_list() {
        let text = "Agent registered
Device AC:80:0A:11:22:33 WH-1000XM4
Device 5C:F3:70:AA:BB:CC
Device 11:22:33:44:55:66 11-22-33-44-55-66
[CHG] Controller 00:1A:7D:DA:71:13 Discovering: yes
";
        let devices = parse_device_list(&CommandOutput::ok(text)).ok().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].id, "AC:80:0A:11:22:33");
        assert_eq!(devices[0].display_name, "WH-1000XM4");
        assert_eq!(devices[1].display_name, "5C:F3:70:AA:BB:CC");
        assert_eq!(devices[2].display_name, "11:22:33:44:55:66");
    }

    #[test]
    fn test_device_list_edge_cases() {
        assert_eq!(parse_device_list(&CommandOutput::ok("")), ParseOutcome::Parsed(vec![]));
        let out = CommandOutput::ok("Waiting to connect to bluetoothd...");
        assert!(parse_device_list(&out).is_empty());
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("AC:80:0A:11:22:33"));
        assert!(is_valid_address("ac:80:0a:11:22:33"));
        assert!(!is_valid_address("AC:80:0A:11:22"));
        assert!(!is_valid_address("AC:80:0A:11:22:33; rm -rf ~"));
    }
}
