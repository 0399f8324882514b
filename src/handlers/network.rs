// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Network interfaces and Wi-Fi through `nmcli`.

use super::{run_mutation, snapshot_json, DomainHandler, HandlerError};
use crate::config::AppConfig;
use crate::exec::{CommandRunner, CommandSpec};
use crate::parse::nmcli;
use crate::refresh::{RefreshChain, Step};
use crate::store::StateStore;
use futures::future::BoxFuture;
use shellsync_ipc::{Domain, NetworkState};
use std::sync::Arc;

/// Longest SSID allowed by 802.11.
const MAX_SSID_BYTES: usize = 32;

pub struct NetworkHandler {
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<NetworkState>>,
    chain: Arc<RefreshChain<NetworkState>>,
    nmcli: String,
}

impl NetworkHandler {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        let nmcli = config.tools.nmcli.clone();
        let store = Arc::new(StateStore::default());
        let chain = Arc::new(build_chain(&nmcli, Arc::clone(&runner), Arc::clone(&store)));
        Self {
            runner,
            store,
            chain,
            nmcli,
        }
    }

    pub fn store(&self) -> &Arc<StateStore<NetworkState>> {
        &self.store
    }

    fn nmcli(&self) -> CommandSpec {
        CommandSpec::new(&self.nmcli)
    }

    pub async fn set_wifi_enabled(&self, enabled: bool) {
        self.store.update(|s| {
            s.wifi_enabled = enabled;
            if !enabled {
                s.access_points.clear();
            }
        });
        let state = if enabled { "on" } else { "off" };
        run_mutation(self.runner.as_ref(), self.nmcli().args(["radio", "wifi", state])).await;
        self.chain.request();
    }

    /// Join a Wi-Fi network. Without a password, nmcli uses a saved profile
    /// or connects to an open network.
    pub async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<(), HandlerError> {
        if ssid.is_empty() || ssid.len() > MAX_SSID_BYTES {
            return Err(HandlerError::InvalidValue(format!(
                "SSID must be 1-{} bytes",
                MAX_SSID_BYTES
            )));
        }

        let mut spec = self.nmcli().args(["device", "wifi", "connect", ssid]);
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            spec = spec.arg("password").secret_arg(password);
        }
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
        Ok(())
    }

    pub async fn disconnect(&self, device: &str) -> Result<(), HandlerError> {
        if device.is_empty() {
            return Err(HandlerError::InvalidValue("empty device name".to_string()));
        }
        run_mutation(self.runner.as_ref(), self.nmcli().args(["device", "disconnect", device])).await;
        self.chain.request();
        Ok(())
    }

    /// Ask NetworkManager for a fresh scan, then refresh the list.
    pub async fn rescan(&self) {
        run_mutation(self.runner.as_ref(), self.nmcli().args(["device", "wifi", "rescan"])).await;
        self.chain.request();
    }
}

impl DomainHandler for NetworkHandler {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn request_refresh(&self) {
        self.chain.request();
    }

    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.chain.refresh())
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        snapshot_json(Domain::Network, &self.store.current())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }
}

fn build_chain(
    nmcli: &str,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<NetworkState>>,
) -> RefreshChain<NetworkState> {
    let radio = CommandSpec::new(nmcli).args(["radio", "wifi"]);
    let devices = CommandSpec::new(nmcli).args(["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device"]);
    // Listing must not trigger a scan; `rescan` does that explicitly.
    let wifi = CommandSpec::new(nmcli).args([
        "-t",
        "-f",
        "IN-USE,SSID,SIGNAL,SECURITY",
        "device",
        "wifi",
        "list",
        "--rescan",
        "no",
    ]);

    RefreshChain::new("network", runner, store)
        .step(Step::new(
            "wifi radio",
            move |_| radio.clone(),
            nmcli::parse_radio,
            |s: &mut NetworkState, v| s.wifi_enabled = v,
        ))
        .step(Step::new(
            "interfaces",
            move |_| devices.clone(),
            nmcli::parse_interfaces,
            |s: &mut NetworkState, v| s.interfaces = v,
        ))
        .step(Step::new(
            "access points",
            move |_| wifi.clone(),
            nmcli::parse_access_points,
            |s: &mut NetworkState, v| s.access_points = v,
        ))
}
