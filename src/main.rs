// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ShellSync daemon.
//!
//! Keeps one snapshot per domain up to date and exposes them, along with
//! the verbs that change them, on the session bus.

use shellsync::agent;
use shellsync::config::ConfigManager;
use shellsync::dbus::{self, ShellSyncDbusService};
use shellsync::exec::SystemRunner;
use shellsync::handlers::{DomainHandler, Handlers};
use shellsync::store::StateStore;
use shellsync_ipc::{Domain, DBUS_NAME, DBUS_PATH};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::connection::Builder;
use zbus::Connection;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shellsync=debug".parse()?)
                .add_directive("zbus=warn".parse()?),
        )
        .init();

    info!("ShellSync starting...");

    let config_manager = ConfigManager::new()?;
    let config = config_manager.load_or_init().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Default::default()
    });
    info!(
        "Loaded config: polling every {:?}, variables file {}",
        config.general.poll_interval(),
        config.compositor.variables_path.display()
    );

    let handlers = Arc::new(Handlers::new(Arc::new(SystemRunner), &config));

    // First snapshot of every domain before anyone can ask for it
    handlers.refresh_all().await;
    for handler in handlers.all() {
        debug!("{} ready at generation {}", handler.domain(), handler.generation());
    }

    let poll_task = config.general.poll_interval().map(|every| {
        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                handlers.request_all();
            }
        })
    });

    let connection = Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, ShellSyncDbusService::new(Arc::clone(&handlers)))?
        .build()
        .await?;

    info!("D-Bus service registered at {}", DBUS_NAME);

    let forwarders = vec![
        forward_snapshots(&connection, Domain::Sound, handlers.sound.store()),
        forward_snapshots(&connection, Domain::Bluetooth, handlers.bluetooth.store()),
        forward_snapshots(&connection, Domain::Network, handlers.network.store()),
        forward_snapshots(&connection, Domain::Display, handlers.display.store()),
        forward_snapshots(&connection, Domain::Compositor, handlers.compositor.store()),
    ];

    // Pairing from the shell needs someone to answer BlueZ's prompts
    let agent_bus = if config.bluetooth.auto_accept_agent {
        start_agent().await
    } else {
        None
    };

    info!("ShellSync ready");

    // Handle shutdown signals
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    if let Some(task) = poll_task {
        task.abort();
    }
    for task in &forwarders {
        task.abort();
    }

    // Debounced writes would otherwise be lost
    if tokio::time::timeout(Duration::from_secs(5), handlers.flush())
        .await
        .is_err()
    {
        warn!("Timed out flushing pending changes");
    }

    if let Some(bus) = &agent_bus {
        if let Err(e) = agent::unregister(bus).await {
            debug!("Failed to unregister Bluetooth agent: {}", e);
        }
    }

    info!("ShellSync stopped");
    Ok(())
}

/// Emit `SnapshotChanged` whenever `store` publishes.
fn forward_snapshots<S>(
    connection: &Connection,
    domain: Domain,
    store: &StateStore<S>,
) -> JoinHandle<()>
where
    S: Clone + Send + Sync + 'static,
{
    let connection = connection.clone();
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let generation = rx.borrow_and_update().generation;
            let object_server = connection.object_server();
            let iface_ref = match object_server
                .interface::<_, ShellSyncDbusService>(DBUS_PATH)
                .await
            {
                Ok(iface) => iface,
                Err(e) => {
                    warn!("Failed to get D-Bus interface for signal: {}", e);
                    continue;
                }
            };
            if let Err(e) =
                dbus::emit_snapshot_changed(iface_ref.signal_context(), domain, generation).await
            {
                warn!("Failed to emit SnapshotChanged for {}: {}", domain, e);
            }
        }
    })
}

/// Register the pairing agent on the system bus. The returned connection
/// must stay open for the agent to keep answering.
async fn start_agent() -> Option<Connection> {
    let bus = match Builder::system() {
        Ok(builder) => builder.build().await,
        Err(e) => Err(e),
    };
    let bus = match bus {
        Ok(bus) => bus,
        Err(e) => {
            warn!("No system bus, Bluetooth agent not started: {}", e);
            return None;
        }
    };
    match agent::register(&bus).await {
        Ok(()) => Some(bus),
        Err(e) => {
            warn!("Failed to register Bluetooth agent: {}", e);
            None
        }
    }
}
