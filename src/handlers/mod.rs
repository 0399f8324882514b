// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-domain handlers.
//!
//! Each handler owns a [`StateStore`], the [`RefreshChain`] that fills it,
//! and the schedulers for its rate-limited verbs. Every verb that changes
//! external state requests a refresh once its command has run, so the store
//! converges on what the tools report.
//!
//! [`StateStore`]: crate::store::StateStore
//! [`RefreshChain`]: crate::refresh::RefreshChain

pub mod bluetooth;
pub mod compositor;
pub mod display;
pub mod network;
pub mod sound;

pub use bluetooth::BluetoothHandler;
pub use compositor::CompositorHandler;
pub use display::DisplayHandler;
pub use network::NetworkHandler;
pub use sound::SoundHandler;

use crate::config::AppConfig;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::store::Snapshot;
use futures::future::BoxFuture;
use serde::Serialize;
use shellsync_ipc::{Domain, ParseTargetError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Rejected caller input. Tool failures are never reported this way.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),
    #[error("Invalid variable name: {0}")]
    InvalidVariableName(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Not a stream: {0}")]
    NotAStream(String),
    #[error("Invalid monitor settings: {0}")]
    InvalidMonitor(String),
    #[error(transparent)]
    Target(#[from] ParseTargetError),
}

/// The surface every domain handler shares.
pub trait DomainHandler: Send + Sync {
    fn domain(&self) -> Domain;

    /// Start a refresh run without waiting for it.
    fn request_refresh(&self);

    /// Refresh and wait until the result is published.
    fn refresh(&self) -> BoxFuture<'_, ()>;

    /// The current snapshot as JSON.
    fn snapshot_json(&self) -> Result<String, serde_json::Error>;

    fn generation(&self) -> u64;

    /// Dispatch any rate-limited mutations that are still waiting.
    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[derive(Serialize)]
struct SnapshotView<'a, S> {
    domain: Domain,
    generation: u64,
    stale: &'a [String],
    state: &'a S,
}

pub(crate) fn snapshot_json<S: Serialize>(
    domain: Domain,
    snapshot: &Snapshot<S>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SnapshotView {
        domain,
        generation: snapshot.generation,
        stale: &snapshot.stale,
        state: &snapshot.state,
    })
}

/// Run a state-changing command, logging the outcome.
pub(crate) async fn run_mutation(runner: &dyn CommandRunner, spec: CommandSpec) -> CommandOutput {
    info!("Running {}", spec);
    let program = spec.program.clone();
    let out = runner.run(spec).await;
    if !out.success() {
        warn!(
            "{} failed (exit {}): {}",
            program,
            out.exit_code,
            out.stderr.trim()
        );
    }
    out
}

/// Owns one handler per domain.
pub struct Handlers {
    pub sound: Arc<SoundHandler>,
    pub bluetooth: Arc<BluetoothHandler>,
    pub network: Arc<NetworkHandler>,
    pub display: Arc<DisplayHandler>,
    pub compositor: Arc<CompositorHandler>,
}

impl Handlers {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        Self {
            sound: Arc::new(SoundHandler::new(Arc::clone(&runner), config)),
            bluetooth: Arc::new(BluetoothHandler::new(Arc::clone(&runner), config)),
            network: Arc::new(NetworkHandler::new(Arc::clone(&runner), config)),
            display: Arc::new(DisplayHandler::new(Arc::clone(&runner), config)),
            compositor: Arc::new(CompositorHandler::new(runner, config)),
        }
    }

    pub fn get(&self, domain: Domain) -> &dyn DomainHandler {
        match domain {
            Domain::Sound => self.sound.as_ref(),
            Domain::Bluetooth => self.bluetooth.as_ref(),
            Domain::Network => self.network.as_ref(),
            Domain::Display => self.display.as_ref(),
            Domain::Compositor => self.compositor.as_ref(),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn DomainHandler> + '_ {
        Domain::ALL.into_iter().map(move |d| self.get(d))
    }

    /// Refresh every domain concurrently and wait for all of them.
    pub async fn refresh_all(&self) {
        futures::future::join_all(self.all().map(|h| h.refresh())).await;
    }

    pub fn request_all(&self) {
        for handler in self.all() {
            handler.request_refresh();
        }
    }

    pub async fn flush(&self) {
        for handler in self.all() {
            handler.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_survives_missing_tools() {
        let runner = ScriptedRunner::new();
        let handlers = Handlers::new(Arc::new(runner.clone()), &AppConfig::default());

        handlers.refresh_all().await;

        for handler in handlers.all() {
            assert_eq!(handler.generation(), 1, "{}", handler.domain());
        }
        let json: serde_json::Value =
            serde_json::from_str(&handlers.get(Domain::Sound).snapshot_json().unwrap()).unwrap();
        assert_eq!(json["domain"], "sound");
        assert_eq!(json["generation"], 1);
        assert!(json["stale"].as_array().unwrap().len() >= 4);
        assert!(runner.count("pactl") > 0);
        assert!(runner.count("bluetoothctl") > 0);
        assert!(runner.count("nmcli") > 0);
        assert!(runner.count("hyprctl") > 0);
    }

    #[test]
    fn test_get_returns_matching_domain() {
        let handlers = Handlers::new(Arc::new(ScriptedRunner::new()), &AppConfig::default());
        for domain in Domain::ALL {
            assert_eq!(handlers.get(domain).domain(), domain);
        }
    }
}
