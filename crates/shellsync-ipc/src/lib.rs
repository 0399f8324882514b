// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared state records and D-Bus names for ShellSync.
//!
//! These are the read-only snapshots the daemon publishes for each domain.
//! UI clients receive them as JSON over D-Bus and deserialize them with
//! the same types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// D-Bus service name for the ShellSync daemon.
pub const DBUS_NAME: &str = "org.shellsync.Daemon";

/// D-Bus object path for the main daemon interface.
pub const DBUS_PATH: &str = "/org/shellsync/Daemon";

/// Errors for the string forms used on the D-Bus surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseTargetError {
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),
    #[error("Unknown device kind: {0}")]
    UnknownDeviceKind(String),
    #[error("Malformed audio target: {0}")]
    MalformedTarget(String),
}

/// Clamp an integer percentage into 0..=100.
pub fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

// ==================== Domains ====================

/// A logical state domain, each backed by its own handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Sound,
    Bluetooth,
    Network,
    Display,
    Compositor,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Sound,
        Domain::Bluetooth,
        Domain::Network,
        Domain::Display,
        Domain::Compositor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Sound => "sound",
            Domain::Bluetooth => "bluetooth",
            Domain::Network => "network",
            Domain::Display => "display",
            Domain::Compositor => "compositor",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTargetError::UnknownDomain(s.to_string()))
    }
}

// ==================== Devices and streams ====================

/// An addressable audio or Bluetooth endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable external identifier (sink/source name or MAC address).
    pub id: String,
    /// Index assigned by the mixer daemon, if any.
    pub index: Option<u32>,
    /// Human-readable name.
    pub display_name: String,
    /// Volume percentage, 0-100. Only set for audio devices.
    pub volume: Option<u8>,
    pub muted: bool,
    pub connected: bool,
    pub paired: bool,
    pub is_default: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }
}

/// A per-application audio stream (sink-input or source-output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Daemon-assigned index; not stable across daemon restarts.
    pub index: u32,
    pub owner_name: String,
    pub volume: u8,
    pub muted: bool,
    /// Id of the device the stream is attached to.
    pub parent_device_id: String,
}

/// Audio device direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Sink,
    Source,
}

impl FromStr for DeviceKind {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sink" | "output" => Ok(DeviceKind::Sink),
            "source" | "input" => Ok(DeviceKind::Source),
            other => Err(ParseTargetError::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// Something whose volume or mute state can be changed.
///
/// The string form is `sink:<name>`, `source:<name>`, `sink-input:<index>`
/// or `source-output:<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioTarget {
    Sink(String),
    Source(String),
    SinkInput(u32),
    SourceOutput(u32),
}

impl AudioTarget {
    pub fn is_stream(&self) -> bool {
        matches!(self, AudioTarget::SinkInput(_) | AudioTarget::SourceOutput(_))
    }
}

impl fmt::Display for AudioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioTarget::Sink(name) => write!(f, "sink:{}", name),
            AudioTarget::Source(name) => write!(f, "source:{}", name),
            AudioTarget::SinkInput(index) => write!(f, "sink-input:{}", index),
            AudioTarget::SourceOutput(index) => write!(f, "source-output:{}", index),
        }
    }
}

impl FromStr for AudioTarget {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseTargetError::MalformedTarget(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(malformed)?;
        if id.is_empty() {
            return Err(malformed());
        }
        match kind {
            "sink" => Ok(AudioTarget::Sink(id.to_string())),
            "source" => Ok(AudioTarget::Source(id.to_string())),
            "sink-input" => id.parse().map(AudioTarget::SinkInput).map_err(|_| malformed()),
            "source-output" => id.parse().map(AudioTarget::SourceOutput).map_err(|_| malformed()),
            _ => Err(malformed()),
        }
    }
}

/// Sound domain snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioState {
    pub sinks: Vec<Device>,
    pub sources: Vec<Device>,
    pub sink_inputs: Vec<Stream>,
    pub source_outputs: Vec<Stream>,
    pub default_sink: Option<String>,
    pub default_source: Option<String>,
}

impl AudioState {
    pub fn device(&self, kind: DeviceKind, id: &str) -> Option<&Device> {
        match kind {
            DeviceKind::Sink => self.sinks.iter().find(|d| d.id == id),
            DeviceKind::Source => self.sources.iter().find(|d| d.id == id),
        }
    }

    pub fn default_device(&self, kind: DeviceKind) -> Option<&Device> {
        let id = match kind {
            DeviceKind::Sink => self.default_sink.as_deref()?,
            DeviceKind::Source => self.default_source.as_deref()?,
        };
        self.device(kind, id)
    }
}

// ==================== Bluetooth ====================

/// The default Bluetooth controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothAdapter {
    pub address: String,
    pub name: String,
    pub powered: bool,
    pub discovering: bool,
    pub discoverable: bool,
}

/// Bluetooth domain snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothState {
    /// None when no controller is present.
    pub adapter: Option<BluetoothAdapter>,
    /// Paired devices, with `connected` populated.
    pub paired: Vec<Device>,
    /// Known but unpaired devices (scan results).
    pub available: Vec<Device>,
}

// ==================== Network ====================

/// A network interface as reported by the network manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub device: String,
    pub kind: String,
    pub state: String,
    /// Active connection profile, if any.
    pub connection: Option<String>,
}

impl NetworkInterface {
    /// True for `connected` and `connected (externally)`.
    pub fn is_connected(&self) -> bool {
        self.state.starts_with("connected")
    }
}

/// A visible Wi-Fi network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub signal: u8,
    pub secured: bool,
    pub active: bool,
}

/// Network domain snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub wifi_enabled: bool,
    pub interfaces: Vec<NetworkInterface>,
    pub access_points: Vec<AccessPoint>,
}

impl NetworkState {
    pub fn active_access_point(&self) -> Option<&AccessPoint> {
        self.access_points.iter().find(|ap| ap.active)
    }
}

// ==================== Display ====================

/// A monitor as reported by the compositor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
    pub x: i32,
    pub y: i32,
    pub scale: f64,
    pub focused: bool,
    pub active_workspace: Option<i64>,
}

/// Backlight brightness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brightness {
    pub current: u32,
    pub max: u32,
    pub percent: u8,
}

impl Brightness {
    pub fn from_raw(current: u32, max: u32) -> Self {
        let percent = if max == 0 {
            0
        } else {
            clamp_percent(((current as f64 / max as f64) * 100.0).round() as i64)
        };
        Self { current, max, percent }
    }
}

/// Display domain snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub monitors: Vec<Monitor>,
    /// None when there is no controllable backlight.
    pub brightness: Option<Brightness>,
}

/// Requested mode for one monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
    pub x: i32,
    pub y: i32,
    pub scale: f64,
}

// ==================== Compositor config ====================

/// One `$name = value` assignment from the compositor variables file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVariable {
    pub name: String,
    pub value: String,
}

/// Compositor config domain snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorState {
    pub variables: Vec<ConfigVariable>,
}

impl CompositorState {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_target_string_form() {
        let target: AudioTarget = "sink:alsa_output.pci-0000_00_1f.3.analog-stereo"
            .parse()
            .unwrap();
        assert_eq!(
            target,
            AudioTarget::Sink("alsa_output.pci-0000_00_1f.3.analog-stereo".to_string())
        );
        assert_eq!(
            target.to_string(),
            "sink:alsa_output.pci-0000_00_1f.3.analog-stereo"
        );

        assert_eq!("sink-input:42".parse(), Ok(AudioTarget::SinkInput(42)));
        assert!("sink-input:abc".parse::<AudioTarget>().is_err());
        assert!("speaker:foo".parse::<AudioTarget>().is_err());
        assert!("sink:".parse::<AudioTarget>().is_err());
    }

    #[test]
    fn test_domain_parse() {
        assert_eq!("Sound".parse(), Ok(Domain::Sound));
        assert_eq!(" compositor ".parse(), Ok(Domain::Compositor));
        assert!("wifi".parse::<Domain>().is_err());
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-5), 0);
        assert_eq!(clamp_percent(37), 37);
        assert_eq!(clamp_percent(150), 100);
    }

    #[test]
    fn test_brightness_percent() {
        assert_eq!(Brightness::from_raw(1200, 2400).percent, 50);
        assert_eq!(Brightness::from_raw(5, 0).percent, 0);
        assert_eq!(Brightness::from_raw(3000, 2400).percent, 100);
    }

    #[test]
    fn test_default_device_lookup() {
        let mut sink = Device::new("speakers", "Speakers");
        sink.volume = Some(40);
        let state = AudioState {
            sinks: vec![sink.clone()],
            default_sink: Some("speakers".to_string()),
            ..Default::default()
        };
        assert_eq!(state.default_device(DeviceKind::Sink), Some(&sink));
        assert_eq!(state.default_device(DeviceKind::Source), None);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_string(&Domain::Bluetooth).unwrap();
        assert_eq!(json, "\"bluetooth\"");
    }
}
