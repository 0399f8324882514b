// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parsers for `pactl` output.
//!
//! Newer pactl releases emit JSON with `-f json`; older ones only have the
//! indented `Sink #N` text listing. Both are accepted for every list type.

use super::{unreadable, usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;
use regex::Regex;
use serde::Deserialize;
use shellsync_ipc::{clamp_percent, Device, Stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Suffix of the pseudo-sources that mirror each sink.
const MONITOR_SUFFIX: &str = ".monitor";

/// Application ids whose streams are level meters rather than audio.
const METER_APP_IDS: &[&str] = &[
    "org.PulseAudio.pavucontrol",
    "com.saivert.pwvucontrol",
    "org.shellsync.Daemon",
];

/// Application names whose streams are level meters rather than audio.
const METER_APP_NAMES: &[&str] = &["pavucontrol", "pulseaudio volume control", "pwvucontrol"];

/// A stream plus the mixer index of the device it is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub stream: Stream,
    pub parent_index: Option<u32>,
}

// ==================== JSON schema ====================

#[derive(Debug, Deserialize)]
struct JsonChannelVolume {
    #[serde(default)]
    value_percent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonDevice {
    index: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    volume: BTreeMap<String, JsonChannelVolume>,
}

#[derive(Debug, Deserialize)]
struct JsonStream {
    index: u32,
    #[serde(default)]
    sink: Option<u32>,
    #[serde(default)]
    source: Option<u32>,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    volume: BTreeMap<String, JsonChannelVolume>,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

fn json_volume(channels: &BTreeMap<String, JsonChannelVolume>) -> u8 {
    let percents: Vec<f64> = channels
        .values()
        .filter_map(|c| c.value_percent.as_deref())
        .filter_map(|p| p.trim().trim_end_matches('%').trim().parse::<f64>().ok())
        .collect();
    mean_percent(&percents)
}

fn mean_percent(percents: &[f64]) -> u8 {
    if percents.is_empty() {
        return 0;
    }
    let mean = percents.iter().sum::<f64>() / percents.len() as f64;
    clamp_percent(mean.round() as i64)
}

fn json_properties(props: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    props
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k.clone(), s.clone())),
            serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
            _ => None,
        })
        .collect()
}

// ==================== Legacy text listing ====================

/// One `Sink #N` / `Sink Input #N` section of the text listing.
#[derive(Debug, Default)]
struct Block {
    index: u32,
    fields: HashMap<String, String>,
    properties: HashMap<String, String>,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Sink|Source|Sink Input|Source Output) #(\d+)\s*$").expect("static regex")
    })
}

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^([\w.\-]+) = "(.*)"$"#).expect("static regex"))
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("static regex"))
}

fn legacy_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut in_properties = false;

    for line in text.lines() {
        if let Some(caps) = header_re().captures(line) {
            blocks.extend(current.take());
            in_properties = false;
            current = caps[2].parse().ok().map(|index| Block {
                index,
                ..Default::default()
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();

        if trimmed == "Properties:" {
            in_properties = true;
            continue;
        }
        if in_properties {
            if let Some(caps) = property_re().captures(trimmed) {
                block
                    .properties
                    .entry(caps[1].to_string())
                    .or_insert_with(|| caps[2].to_string());
                continue;
            }
            in_properties = false;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            block
                .fields
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    blocks.extend(current);
    blocks
}

fn legacy_volume(line: Option<&String>) -> u8 {
    let percents: Vec<f64> = line
        .map(|l| {
            percent_re()
                .captures_iter(l)
                .filter_map(|c| c[1].parse().ok())
                .collect()
        })
        .unwrap_or_default();
    mean_percent(&percents)
}

fn legacy_mute(block: &Block) -> bool {
    block
        .fields
        .get("Mute")
        .map(|m| m.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

// ==================== Devices ====================

/// Parse a sink listing.
pub fn parse_sinks(out: &CommandOutput) -> ParseOutcome<Vec<Device>> {
    parse_devices(out, "sink list")
}

/// Parse a source listing, dropping the monitor pseudo-sources.
pub fn parse_sources(out: &CommandOutput) -> ParseOutcome<Vec<Device>> {
    parse_devices(out, "source list").map(|devices| {
        devices
            .into_iter()
            .filter(|d| {
                let monitor = is_monitor(&d.id);
                if monitor {
                    trace!("Skipping monitor source {}", d.id);
                }
                !monitor
            })
            .collect()
    })
}

/// Whether a device id names a loopback/monitor pseudo-device.
pub fn is_monitor(id: &str) -> bool {
    id.ends_with(MONITOR_SUFFIX)
}

fn parse_devices(out: &CommandOutput, what: &str) -> ParseOutcome<Vec<Device>> {
    let Some(text) = usable_stdout(out) else {
        debug!("{} unavailable (exit {})", what, out.exit_code);
        return ParseOutcome::Empty;
    };
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return ParseOutcome::Parsed(Vec::new());
    }

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<JsonDevice>>(trimmed) {
            Ok(entries) => {
                return ParseOutcome::Parsed(
                    entries
                        .into_iter()
                        .filter_map(|e| {
                            let name = e.name.filter(|n| !n.is_empty())?;
                            Some(Device {
                                display_name: e.description.unwrap_or_else(|| name.clone()),
                                id: name,
                                index: Some(e.index),
                                volume: Some(json_volume(&e.volume)),
                                muted: e.mute,
                                ..Default::default()
                            })
                        })
                        .collect(),
                );
            }
            Err(e) => debug!("{} is not valid JSON ({}), trying text listing", what, e),
        }
    }

    let blocks = legacy_blocks(text);
    if blocks.is_empty() {
        return unreadable(what, out);
    }

    ParseOutcome::Parsed(
        blocks
            .into_iter()
            .filter_map(|b| {
                let Some(name) = b.fields.get("Name").filter(|n| !n.is_empty()) else {
                    debug!("Skipping {} entry #{} without a name", what, b.index);
                    return None;
                };
                Some(Device {
                    id: name.clone(),
                    index: Some(b.index),
                    display_name: b
                        .fields
                        .get("Description")
                        .cloned()
                        .unwrap_or_else(|| name.clone()),
                    volume: Some(legacy_volume(b.fields.get("Volume"))),
                    muted: legacy_mute(&b),
                    ..Default::default()
                })
            })
            .collect(),
    )
}

// ==================== Streams ====================

/// Whether a stream is a level meter or our own probe rather than audio.
pub fn is_meter_stream(properties: &HashMap<String, String>) -> bool {
    let prop = |key: &str| properties.get(key).map(|v| v.to_ascii_lowercase());

    if let Some(media) = prop("media.name") {
        if media.contains("peak detect") || media.contains("peak-detect") {
            return true;
        }
    }
    if let Some(id) = properties.get("application.id") {
        if METER_APP_IDS.contains(&id.as_str()) {
            return true;
        }
    }
    prop("application.name")
        .map(|name| METER_APP_NAMES.contains(&name.as_str()))
        .unwrap_or(false)
}

fn owner_name(index: u32, properties: &HashMap<String, String>) -> String {
    ["application.name", "media.name", "application.process.binary"]
        .iter()
        .filter_map(|k| properties.get(*k))
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| format!("Stream {}", index))
}

/// Parse a sink-input or source-output listing.
pub fn parse_streams(out: &CommandOutput) -> ParseOutcome<Vec<StreamRecord>> {
    let what = "stream list";
    let Some(text) = usable_stdout(out) else {
        debug!("{} unavailable (exit {})", what, out.exit_code);
        return ParseOutcome::Empty;
    };
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return ParseOutcome::Parsed(Vec::new());
    }

    let records: Vec<(u32, Option<u32>, bool, u8, HashMap<String, String>)> =
        match serde_json::from_str::<Vec<JsonStream>>(trimmed) {
            Ok(entries) if trimmed.starts_with('[') => entries
                .into_iter()
                .map(|e| {
                    (
                        e.index,
                        e.sink.or(e.source),
                        e.mute,
                        json_volume(&e.volume),
                        json_properties(&e.properties),
                    )
                })
                .collect(),
            _ => {
                let blocks = legacy_blocks(text);
                if blocks.is_empty() {
                    return unreadable(what, out);
                }
                blocks
                    .into_iter()
                    .map(|b| {
                        let parent = b
                            .fields
                            .get("Sink")
                            .or_else(|| b.fields.get("Source"))
                            .and_then(|p| p.parse().ok());
                        let muted = legacy_mute(&b);
                        let volume = legacy_volume(b.fields.get("Volume"));
                        (b.index, parent, muted, volume, b.properties)
                    })
                    .collect()
            }
        };

    ParseOutcome::Parsed(
        records
            .into_iter()
            .filter(|(index, _, _, _, props)| {
                let meter = is_meter_stream(props);
                if meter {
                    trace!("Skipping meter stream #{}", index);
                }
                !meter
            })
            .map(|(index, parent_index, muted, volume, props)| StreamRecord {
                stream: Stream {
                    index,
                    owner_name: owner_name(index, &props),
                    volume,
                    muted,
                    parent_device_id: String::new(),
                },
                parent_index,
            })
            .collect(),
    )
}

/// Resolve stream parents from mixer indices to device ids.
///
/// Streams whose parent is not in `devices` keep the index as their id.
pub fn attach_streams(records: Vec<StreamRecord>, devices: &[Device]) -> Vec<Stream> {
    records
        .into_iter()
        .map(|mut r| {
            r.stream.parent_device_id = match r.parent_index {
                Some(index) => devices
                    .iter()
                    .find(|d| d.index == Some(index))
                    .map(|d| d.id.clone())
                    .unwrap_or_else(|| index.to_string()),
                None => String::new(),
            };
            r.stream
        })
        .collect()
}

// ==================== Defaults ====================

/// Parse `get-default-sink` / `get-default-source` (or the `pactl info`
/// fallback, reduced to the bare name).
///
/// A running mixer always names a default, so blank output means the
/// query failed somewhere in the fallback pipeline.
pub fn parse_default_device(out: &CommandOutput) -> ParseOutcome<String> {
    usable_stdout(out)
        .and_then(|text| text.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(str::to_string)
        .into()
}
