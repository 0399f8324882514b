// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! D-Bus interface for the daemon.
//!
//! Snapshots travel as JSON strings; targets and domains use their string
//! forms (`sink:alsa_output.pci`, `sink-input:42`, `bluetooth`).

use crate::handlers::{HandlerError, Handlers};
use shellsync_ipc::{AudioTarget, DeviceKind, Domain, MonitorSettings};
use std::sync::Arc;
use tracing::debug;
use zbus::interface;

/// Input validation helpers for D-Bus method arguments.
mod validate {
    /// Validate a free-form identifier: non-empty, bounded, no control characters.
    pub fn validate_text(what: &str, value: &str, max: usize) -> Result<(), zbus::fdo::Error> {
        if value.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(format!("{} must not be empty", what)));
        }
        if value.len() > max {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "{} exceeds {} character limit (got {})",
                what,
                max,
                value.len()
            )));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "{} must not contain control characters",
                what
            )));
        }
        Ok(())
    }

    /// Validate a device or stream id.
    pub fn validate_id(id: &str) -> Result<(), zbus::fdo::Error> {
        validate_text("Id", id, 256)
    }

    /// Parse anything with a `FromStr` into an `InvalidArgs` on failure.
    pub fn parse<T>(value: &str) -> Result<T, zbus::fdo::Error>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .parse()
            .map_err(|e: T::Err| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }
}

fn rejected(e: HandlerError) -> zbus::fdo::Error {
    zbus::fdo::Error::InvalidArgs(e.to_string())
}

/// The D-Bus interface implementation.
pub struct ShellSyncDbusService {
    handlers: Arc<Handlers>,
}

impl ShellSyncDbusService {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        Self { handlers }
    }
}

#[interface(name = "org.shellsync.Daemon")]
impl ShellSyncDbusService {
    // ==================== Snapshots ====================

    /// Refresh one domain and wait until the new snapshot is published.
    async fn refresh(&self, domain: &str) -> zbus::fdo::Result<u64> {
        let domain: Domain = validate::parse(domain)?;
        debug!("D-Bus: refresh({})", domain);
        let handler = self.handlers.get(domain);
        handler.refresh().await;
        Ok(handler.generation())
    }

    /// Current snapshot of one domain as JSON.
    async fn get_snapshot(&self, domain: &str) -> zbus::fdo::Result<String> {
        let domain: Domain = validate::parse(domain)?;
        self.handlers
            .get(domain)
            .snapshot_json()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    // ==================== Sound ====================

    /// Set the default device. `kind` is `sink` or `source`.
    async fn set_default_device(&self, kind: &str, id: &str) -> zbus::fdo::Result<()> {
        let kind: DeviceKind = validate::parse(kind)?;
        validate::validate_id(id)?;
        debug!("D-Bus: set_default_device({:?}, {})", kind, id);
        self.handlers.sound.set_default_device(kind, id).await;
        Ok(())
    }

    async fn set_volume(&self, target: &str, percent: i32) -> zbus::fdo::Result<()> {
        let target: AudioTarget = validate::parse(target)?;
        self.handlers.sound.set_volume(target, percent.into());
        Ok(())
    }

    async fn toggle_mute(&self, target: &str) -> zbus::fdo::Result<()> {
        let target: AudioTarget = validate::parse(target)?;
        debug!("D-Bus: toggle_mute({})", target);
        self.handlers.sound.toggle_mute(target).await;
        Ok(())
    }

    async fn move_stream(&self, stream: &str, device_id: &str) -> zbus::fdo::Result<()> {
        let stream: AudioTarget = validate::parse(stream)?;
        validate::validate_id(device_id)?;
        debug!("D-Bus: move_stream({}, {})", stream, device_id);
        self.handlers
            .sound
            .move_stream(stream, device_id)
            .await
            .map_err(rejected)
    }

    // ==================== Bluetooth ====================

    async fn set_bluetooth_power(&self, on: bool) -> zbus::fdo::Result<()> {
        debug!("D-Bus: set_bluetooth_power({})", on);
        self.handlers.bluetooth.set_power(on).await;
        Ok(())
    }

    async fn start_scan(&self) -> zbus::fdo::Result<()> {
        self.handlers.bluetooth.start_scan();
        Ok(())
    }

    async fn stop_scan(&self) -> zbus::fdo::Result<()> {
        self.handlers.bluetooth.stop_scan().await;
        Ok(())
    }

    async fn pair(&self, address: &str) -> zbus::fdo::Result<()> {
        debug!("D-Bus: pair({})", address);
        self.handlers.bluetooth.pair(address).await.map_err(rejected)
    }

    async fn connect_device(&self, address: &str) -> zbus::fdo::Result<()> {
        debug!("D-Bus: connect_device({})", address);
        self.handlers.bluetooth.connect(address).await.map_err(rejected)
    }

    async fn disconnect_device(&self, address: &str) -> zbus::fdo::Result<()> {
        debug!("D-Bus: disconnect_device({})", address);
        self.handlers.bluetooth.disconnect(address).await.map_err(rejected)
    }

    /// Whether a discovery scan is running.
    #[zbus(property)]
    async fn scanning(&self) -> bool {
        self.handlers.bluetooth.is_scanning()
    }

    // ==================== Network ====================

    async fn set_wifi_enabled(&self, enabled: bool) -> zbus::fdo::Result<()> {
        debug!("D-Bus: set_wifi_enabled({})", enabled);
        self.handlers.network.set_wifi_enabled(enabled).await;
        Ok(())
    }

    /// Join a Wi-Fi network. An empty password means none.
    async fn connect_wifi(&self, ssid: &str, password: &str) -> zbus::fdo::Result<()> {
        // The password is never logged.
        debug!("D-Bus: connect_wifi({})", ssid);
        let password = (!password.is_empty()).then_some(password);
        self.handlers
            .network
            .connect(ssid, password)
            .await
            .map_err(rejected)
    }

    async fn disconnect_interface(&self, device: &str) -> zbus::fdo::Result<()> {
        validate::validate_id(device)?;
        debug!("D-Bus: disconnect_interface({})", device);
        self.handlers.network.disconnect(device).await.map_err(rejected)
    }

    async fn rescan_wifi(&self) -> zbus::fdo::Result<()> {
        self.handlers.network.rescan().await;
        Ok(())
    }

    // ==================== Display ====================

    async fn set_brightness(&self, percent: i32) -> zbus::fdo::Result<()> {
        self.handlers.display.set_brightness(percent.into());
        Ok(())
    }

    async fn apply_monitor_settings(
        &self,
        name: &str,
        width: u32,
        height: u32,
        refresh_rate: f64,
        x: i32,
        y: i32,
        scale: f64,
    ) -> zbus::fdo::Result<()> {
        validate::validate_text("Monitor name", name, 64)?;
        debug!("D-Bus: apply_monitor_settings({})", name);
        let settings = MonitorSettings {
            name: name.to_string(),
            width,
            height,
            refresh_rate,
            x,
            y,
            scale,
        };
        self.handlers
            .display
            .apply_monitor_settings(settings)
            .await
            .map_err(rejected)
    }

    // ==================== Compositor ====================

    async fn set_setting(&self, name: &str, value: &str) -> zbus::fdo::Result<()> {
        debug!("D-Bus: set_setting({}, {})", name, value);
        if value.len() > 1024 {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "Value exceeds 1024 character limit (got {})",
                value.len()
            )));
        }
        self.handlers.compositor.set_setting(name, value).map_err(rejected)
    }

    async fn reload_compositor(&self) -> zbus::fdo::Result<()> {
        self.handlers.compositor.reload().await;
        Ok(())
    }

    // ==================== Signals ====================

    /// A domain published a new snapshot.
    #[zbus(signal)]
    async fn snapshot_changed(
        ctx: &zbus::SignalContext<'_>,
        domain: &str,
        generation: u64,
    ) -> zbus::Result<()>;
}

// ==================== Public Signal Emission Helpers ====================

/// Emit SnapshotChanged from outside an interface method.
pub async fn emit_snapshot_changed(
    ctx: &zbus::SignalContext<'_>,
    domain: Domain,
    generation: u64,
) -> zbus::Result<()> {
    ShellSyncDbusService::snapshot_changed(ctx, domain.as_str(), generation).await
}

#[cfg(test)]
mod tests {
    use super::validate;

    #[test]
    fn test_validate_text() {
        assert!(validate::validate_text("Id", "alsa_output.pci", 256).is_ok());
        assert!(validate::validate_text("Id", "", 256).is_err());
        assert!(validate::validate_text("Id", "a\nb", 256).is_err());
        assert!(validate::validate_text("Id", &"x".repeat(257), 256).is_err());
    }

    #[test]
    fn test_parse_maps_to_invalid_args() {
        let target: shellsync_ipc::AudioTarget = validate::parse("sink-input:7").unwrap();
        assert!(target.is_stream());

        let err = validate::parse::<shellsync_ipc::Domain>("printer").unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }
}
