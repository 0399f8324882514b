// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bluetooth adapter and devices through `bluetoothctl`.

use super::{run_mutation, snapshot_json, DomainHandler, HandlerError};
use crate::config::AppConfig;
use crate::exec::{shell_quote, CommandRunner, CommandSpec};
use crate::parse::bluetoothctl::{self, is_valid_address};
use crate::refresh::{RefreshChain, Step};
use crate::store::StateStore;
use futures::future::BoxFuture;
use shellsync_ipc::{BluetoothState, Device, Domain};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct BluetoothHandler {
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<BluetoothState>>,
    chain: Arc<RefreshChain<BluetoothState>>,
    bluetoothctl: String,
    scan_timeout: Duration,
    scan_refresh: Duration,
    scan: Arc<Mutex<ScanControl>>,
}

/// The running scan, if any. `id` tells a finished scan task whether it is
/// still the current one.
#[derive(Default)]
struct ScanControl {
    id: u64,
    stop: Option<Arc<Notify>>,
}

impl BluetoothHandler {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        let bluetoothctl = config.tools.bluetoothctl.clone();
        let store = Arc::new(StateStore::default());
        let chain = Arc::new(build_chain(&bluetoothctl, Arc::clone(&runner), Arc::clone(&store)));

        Self {
            runner,
            store,
            chain,
            bluetoothctl,
            scan_timeout: Duration::from_secs(config.bluetooth.scan_timeout_secs.max(1)),
            scan_refresh: config.timing.scan_refresh(),
            scan: Arc::new(Mutex::new(ScanControl::default())),
        }
    }

    pub fn store(&self) -> &Arc<StateStore<BluetoothState>> {
        &self.store
    }

    fn bluetoothctl(&self) -> CommandSpec {
        CommandSpec::new(&self.bluetoothctl)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.lock().stop.is_some()
    }

    pub async fn set_power(&self, on: bool) {
        self.store.update(|s| {
            if let Some(adapter) = s.adapter.as_mut() {
                adapter.powered = on;
            }
        });
        let state = if on { "on" } else { "off" };
        run_mutation(self.runner.as_ref(), self.bluetoothctl().args(["power", state])).await;
        self.chain.request();
    }

    /// Start discovery in the background.
    ///
    /// The scan runs until the configured timeout or [`stop_scan`]; the
    /// device lists are refreshed periodically while it runs. Starting a scan
    /// while one is running does nothing.
    ///
    /// [`stop_scan`]: Self::stop_scan
    pub fn start_scan(&self) {
        let (id, stop) = {
            let mut scan = self.scan.lock();
            if scan.stop.is_some() {
                debug!("Bluetooth scan already running");
                return;
            }
            let stop = Arc::new(Notify::new());
            scan.id += 1;
            scan.stop = Some(Arc::clone(&stop));
            (scan.id, stop)
        };
        self.set_discovering(true);

        let spec = self
            .bluetoothctl()
            .arg("--timeout")
            .arg(self.scan_timeout.as_secs().to_string())
            .args(["scan", "on"]);
        info!("Starting Bluetooth scan ({}s)", self.scan_timeout.as_secs());

        let runner = Arc::clone(&self.runner);
        let chain = Arc::clone(&self.chain);
        let control = Arc::clone(&self.scan);
        let every = self.scan_refresh;

        tokio::spawn(async move {
            let scan = runner.run(spec);
            tokio::pin!(scan);

            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut scan => break,
                    // `notify_one` leaves a permit, so a stop that lands
                    // before this task first runs is still seen.
                    _ = stop.notified() => break,
                    _ = ticker.tick() => chain.request(),
                }
            }

            {
                let mut control = control.lock();
                if control.id == id {
                    control.stop = None;
                }
            }
            debug!("Bluetooth scan finished");
            chain.request();
        });
    }

    pub async fn stop_scan(&self) {
        if let Some(stop) = self.scan.lock().stop.take() {
            stop.notify_one();
        }
        self.set_discovering(false);
        run_mutation(self.runner.as_ref(), self.bluetoothctl().args(["scan", "off"])).await;
        self.chain.request();
    }

    fn set_discovering(&self, on: bool) {
        self.store.update(|s| {
            if let Some(adapter) = s.adapter.as_mut() {
                adapter.discovering = on;
            }
        });
    }

    /// Pair with a device and mark it trusted.
    pub async fn pair(&self, address: &str) -> Result<(), HandlerError> {
        let address = checked_address(address)?;
        let pair = self.bluetoothctl().args(["pair", address.as_str()]);
        if run_mutation(self.runner.as_ref(), pair).await.success() {
            let trust = self.bluetoothctl().args(["trust", address.as_str()]);
            run_mutation(self.runner.as_ref(), trust).await;
        }
        self.chain.request();
        Ok(())
    }

    pub async fn connect(&self, address: &str) -> Result<(), HandlerError> {
        let address = checked_address(address)?;
        let spec = self.bluetoothctl().args(["connect", address.as_str()]);
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
        Ok(())
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), HandlerError> {
        let address = checked_address(address)?;
        self.store.update(|s| {
            if let Some(device) = s.paired.iter_mut().find(|d| d.id == address) {
                device.connected = false;
            }
        });
        let spec = self.bluetoothctl().args(["disconnect", address.as_str()]);
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
        Ok(())
    }
}

impl DomainHandler for BluetoothHandler {
    fn domain(&self) -> Domain {
        Domain::Bluetooth
    }

    fn request_refresh(&self) {
        self.chain.request();
    }

    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.chain.refresh())
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        snapshot_json(Domain::Bluetooth, &self.store.current())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }
}

fn checked_address(address: &str) -> Result<String, HandlerError> {
    let address = address.trim();
    if is_valid_address(address) {
        Ok(address.to_ascii_uppercase())
    } else {
        Err(HandlerError::InvalidAddress(address.to_string()))
    }
}

fn build_chain(
    bluetoothctl: &str,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<BluetoothState>>,
) -> RefreshChain<BluetoothState> {
    let tool = shell_quote(bluetoothctl);
    let show = CommandSpec::new(bluetoothctl).arg("show");
    let paired = CommandSpec::fallback(
        &CommandSpec::new(bluetoothctl).args(["devices", "Paired"]),
        &format!("{} paired-devices", tool),
    );
    // Older releases cannot filter by state; ask each device instead.
    let connected = CommandSpec::fallback(
        &CommandSpec::new(bluetoothctl).args(["devices", "Connected"]),
        &format!(
            "for a in $({tool} devices | cut -d' ' -f2); do \
             {tool} info \"$a\" | grep -q 'Connected: yes' && echo \"Device $a\"; done; true",
            tool = tool
        ),
    );
    let all = CommandSpec::new(bluetoothctl).arg("devices");

    RefreshChain::new("bluetooth", runner, store)
        .step(Step::new(
            "adapter",
            move |_| show.clone(),
            bluetoothctl::parse_adapter,
            |s: &mut BluetoothState, v| s.adapter = v,
        ))
        .step(Step::new(
            "paired devices",
            move |_| paired.clone(),
            bluetoothctl::parse_device_list,
            |s: &mut BluetoothState, v: Vec<Device>| {
                // Connection flags come from the next step; until it succeeds
                // keep the ones from the last snapshot.
                let paired = v
                    .into_iter()
                    .map(|mut d| {
                        d.paired = true;
                        d.connected = s.paired.iter().any(|p| p.id == d.id && p.connected);
                        d
                    })
                    .collect();
                s.paired = paired;
            },
        ))
        .step(Step::new(
            "connected devices",
            move |_| connected.clone(),
            bluetoothctl::parse_addresses,
            |s: &mut BluetoothState, v: Vec<String>| {
                for device in &mut s.paired {
                    device.connected = v.contains(&device.id);
                }
            },
        ))
        .step(Step::new(
            "devices",
            move |_| all.clone(),
            bluetoothctl::parse_device_list,
            |s: &mut BluetoothState, v: Vec<Device>| {
                s.available = v
                    .into_iter()
                    .filter(|d| !s.paired.iter().any(|p| p.id == d.id))
                    .collect();
            },
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use crate::exec::CommandOutput;
    use tokio::time::sleep;

    const SHOW: &str = "Controller 00:1A:7D:DA:71:13 (public)
\tName: thinkpad
\tAlias: thinkpad
\tPowered: yes
\tDiscoverable: no
\tDiscovering: no
";

    fn scripted() -> ScriptedRunner {
        let runner = ScriptedRunner::new();
        runner.respond("bluetoothctl show", CommandOutput::ok(SHOW));
        runner.respond(
            "devices Paired",
            CommandOutput::ok("Device AA:BB:CC:DD:EE:01 Headphones\nDevice AA:BB:CC:DD:EE:02 Keyboard\n"),
        );
        runner.respond(
            "devices Connected",
            CommandOutput::ok("Device AA:BB:CC:DD:EE:02 Keyboard\n"),
        );
        runner.respond(
            "bluetoothctl devices",
            CommandOutput::ok(
                "Device AA:BB:CC:DD:EE:01 Headphones\nDevice AA:BB:CC:DD:EE:02 Keyboard\n\
                 Device 11:22:33:44:55:66 Speaker\n",
            ),
        );
        runner
    }

    fn handler(runner: &ScriptedRunner) -> BluetoothHandler {
        BluetoothHandler::new(Arc::new(runner.clone()), &AppConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_splits_paired_and_available() {
        let runner = scripted();
        let bt = handler(&runner);
        bt.refresh().await;

        let snapshot = bt.store().current();
        let state = &snapshot.state;
        assert!(state.adapter.as_ref().unwrap().powered);
        assert_eq!(state.paired.len(), 2);
        assert!(state.paired.iter().all(|d| d.paired));
        assert!(!state.paired[0].connected);
        assert!(state.paired[1].connected);
        assert_eq!(state.available.len(), 1);
        assert_eq!(state.available[0].display_name, "Speaker");
        assert!(snapshot.stale.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_address_is_rejected_without_running_anything() {
        let runner = scripted();
        let bt = handler(&runner);

        let err = bt.connect("AA:BB:CC:DD:EE").await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidAddress(_)));
        assert!(bt.pair("not-an-address; rm -rf ~").await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_then_trust() {
        let runner = scripted();
        runner.respond("bluetoothctl pair", CommandOutput::ok("Pairing successful\n"));
        runner.respond("bluetoothctl trust", CommandOutput::ok(""));
        let bt = handler(&runner);

        bt.pair("11:22:33:44:55:66").await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0], "bluetoothctl pair 11:22:33:44:55:66");
        assert_eq!(calls[1], "bluetoothctl trust 11:22:33:44:55:66");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pair_is_not_trusted() {
        let runner = scripted();
        runner.respond(
            "bluetoothctl pair",
            CommandOutput::failed(1, "Failed to pair: org.bluez.Error.AuthenticationFailed"),
        );
        let bt = handler(&runner);

        bt.pair("11:22:33:44:55:66").await.unwrap();
        assert_eq!(runner.count("trust"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_refreshes_until_stopped() {
        let runner = scripted();
        runner.respond_after("scan on", CommandOutput::ok(""), Duration::from_secs(10));
        runner.respond("scan off", CommandOutput::ok(""));
        let bt = handler(&runner);

        bt.start_scan();
        bt.start_scan();
        sleep(Duration::from_millis(4500)).await;
        assert!(bt.is_scanning());
        assert_eq!(runner.count("scan on"), 1);
        assert!(runner.count("bluetoothctl show") >= 2);

        bt.stop_scan().await;
        sleep(Duration::from_millis(100)).await;
        assert!(!bt.is_scanning());
        assert_eq!(runner.count("scan off"), 1);

        let shows = runner.count("bluetoothctl show");
        sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.count("bluetoothctl show"), shows);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_start() {
        let runner = scripted();
        runner.respond_after("scan on", CommandOutput::ok(""), Duration::from_secs(10));
        runner.respond("scan off", CommandOutput::ok(""));
        let bt = handler(&runner);

        bt.start_scan();
        bt.stop_scan().await;
        assert!(!bt.is_scanning());
        sleep(Duration::from_millis(100)).await;
        assert!(!bt.is_scanning());

        let shows = runner.count("bluetoothctl show");
        sleep(Duration::from_secs(6)).await;
        assert_eq!(runner.count("bluetoothctl show"), shows);

        // A new scan can start straight away.
        bt.start_scan();
        assert!(bt.is_scanning());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.count("scan on"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_flags_survive_a_failed_connected_query() {
        let runner = scripted();
        let bt = handler(&runner);
        bt.refresh().await;
        assert!(bt.store().current().state.paired[1].connected);

        runner.respond("devices Connected", CommandOutput::not_found("bluetoothctl"));
        bt.refresh().await;

        let snapshot = bt.store().current();
        assert_eq!(snapshot.stale, vec!["connected devices"]);
        assert!(!snapshot.state.paired[0].connected);
        assert!(snapshot.state.paired[1].connected);
    }
}
