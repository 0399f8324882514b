// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parsers for `nmcli --terse` output.

use super::{unreadable, usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;
use shellsync_ipc::{AccessPoint, NetworkInterface};

/// Split one terse line on unescaped colons, resolving `\:` and `\\`.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn optional(field: Option<&String>) -> Option<String> {
    field
        .map(|f| f.trim())
        .filter(|f| !f.is_empty() && *f != "--")
        .map(str::to_string)
}

/// Parse `nmcli radio wifi`.
pub fn parse_radio(out: &CommandOutput) -> ParseOutcome<bool> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };
    match text.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some("enabled") => ParseOutcome::Parsed(true),
        Some("disabled") => ParseOutcome::Parsed(false),
        _ => unreadable("nmcli radio", out),
    }
}

/// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device`.
pub fn parse_interfaces(out: &CommandOutput) -> ParseOutcome<Vec<NetworkInterface>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };

    let mut interfaces = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields = split_terse(line);
        if fields.len() < 3 {
            return unreadable("nmcli device", out);
        }
        if fields[1] == "loopback" {
            continue;
        }
        interfaces.push(NetworkInterface {
            device: fields[0].clone(),
            kind: fields[1].clone(),
            state: fields[2].clone(),
            connection: optional(fields.get(3)),
        });
    }
    ParseOutcome::Parsed(interfaces)
}

/// Parse `nmcli -t -f IN-USE,SSID,SIGNAL,SECURITY device wifi list`.
///
/// Hidden networks are skipped. An SSID seen on several access points is
/// reported once, with the strongest signal.
pub fn parse_access_points(out: &CommandOutput) -> ParseOutcome<Vec<AccessPoint>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };

    let mut points: Vec<AccessPoint> = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields = split_terse(line);
        if fields.len() < 3 {
            return unreadable("nmcli wifi list", out);
        }
        let ssid = fields[1].trim();
        if ssid.is_empty() {
            continue;
        }
        let point = AccessPoint {
            ssid: ssid.to_string(),
            signal: fields[2].trim().parse::<u8>().unwrap_or(0).min(100),
            secured: optional(fields.get(3)).is_some(),
            active: fields[0].trim() == "*",
        };
        match points.iter_mut().find(|p| p.ssid == point.ssid) {
            Some(existing) => {
                existing.active |= point.active;
                if point.signal > existing.signal {
                    existing.signal = point.signal;
                    existing.secured = point.secured;
                }
            }
            None => points.push(point),
        }
    }

    points.sort_by(|a, b| b.active.cmp(&a.active).then(b.signal.cmp(&a.signal)));
    ParseOutcome::Parsed(points)
}
