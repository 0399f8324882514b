// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Daemon configuration (timing windows, tool names, paths).

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// General daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds between background refreshes of every domain. 0 disables polling.
    pub poll_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl GeneralConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

/// Coalescing windows for mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub volume_debounce_ms: u64,
    pub brightness_debounce_ms: u64,
    pub keyword_throttle_ms: u64,
    pub persist_debounce_ms: u64,
    /// Refresh cadence of the Bluetooth device lists while scanning.
    pub scan_refresh_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            volume_debounce_ms: 50,
            brightness_debounce_ms: 50,
            keyword_throttle_ms: 100,
            persist_debounce_ms: 400,
            scan_refresh_ms: 2000,
        }
    }
}

impl TimingConfig {
    pub fn volume_debounce(&self) -> Duration {
        Duration::from_millis(self.volume_debounce_ms)
    }

    pub fn brightness_debounce(&self) -> Duration {
        Duration::from_millis(self.brightness_debounce_ms)
    }

    pub fn keyword_throttle(&self) -> Duration {
        Duration::from_millis(self.keyword_throttle_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn scan_refresh(&self) -> Duration {
        Duration::from_millis(self.scan_refresh_ms.max(1))
    }
}

/// Names (or paths) of the external programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub pactl: String,
    pub bluetoothctl: String,
    pub nmcli: String,
    pub hyprctl: String,
    pub brightnessctl: String,
    pub sed: String,
    pub cat: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pactl: "pactl".to_string(),
            bluetoothctl: "bluetoothctl".to_string(),
            nmcli: "nmcli".to_string(),
            hyprctl: "hyprctl".to_string(),
            brightnessctl: "brightnessctl".to_string(),
            sed: "sed".to_string(),
            cat: "cat".to_string(),
        }
    }
}

/// Bluetooth settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// How long a discovery scan runs before bluetoothctl stops it.
    pub scan_timeout_secs: u64,
    /// Register an agent that accepts every pairing request.
    pub auto_accept_agent: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            auto_accept_agent: true,
        }
    }
}

/// Compositor config-file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// File holding the `$name = value` variables.
    pub variables_path: PathBuf,
    /// Variables that also drive a live compositor keyword.
    pub keywords: BTreeMap<String, String>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        let config_home = BaseDirs::new()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".config"));

        let keywords = [
            ("gaps_in", "general:gaps_in"),
            ("gaps_out", "general:gaps_out"),
            ("border_size", "general:border_size"),
            ("rounding", "decoration:rounding"),
        ]
        .into_iter()
        .map(|(name, keyword)| (name.to_string(), keyword.to_string()))
        .collect();

        Self {
            variables_path: config_home.join("hypr").join("variables.conf"),
            keywords,
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub compositor: CompositorConfig,
}

impl AppConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.timing.volume_debounce(), Duration::from_millis(50));
        assert_eq!(
            config.compositor.keywords.get("rounding").map(String::as_str),
            Some("decoration:rounding")
        );
        assert!(config.compositor.variables_path.ends_with("hypr/variables.conf"));
        assert!(config.bluetooth.auto_accept_agent);
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml(
            r#"
[general]
poll_interval_secs = 0

[timing]
persist_debounce_ms = 1000

[tools]
pactl = "/usr/local/bin/pactl"
"#,
        )
        .unwrap();
        assert_eq!(config.general.poll_interval(), None);
        assert_eq!(config.timing.persist_debounce(), Duration::from_secs(1));
        assert_eq!(config.timing.keyword_throttle_ms, 100);
        assert_eq!(config.tools.pactl, "/usr/local/bin/pactl");
        assert_eq!(config.tools.nmcli, "nmcli");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.compositor.variables_path = PathBuf::from("/tmp/vars.conf");
        config
            .compositor
            .keywords
            .insert("active_opacity".into(), "decoration:active_opacity".into());
        let parsed = AppConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(AppConfig::from_toml("[timing]\nvolume_debounce_ms = \"fast\"").is_err());
    }
}
