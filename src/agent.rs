// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! BlueZ pairing agent that accepts every request.
//!
//! `bluetoothctl pair` runs without a terminal, so a device asking for a
//! confirmation or a PIN would stall until BlueZ gives up. With this agent
//! registered as the default, confirmations and authorizations succeed,
//! legacy PIN requests get `0000` and passkey requests get `0`.

use tracing::{debug, info, warn};
use zbus::zvariant::ObjectPath;
use zbus::{interface, proxy, Connection};

/// Object path the agent is served at on the system bus.
pub const AGENT_PATH: &str = "/org/shellsync/BluetoothAgent";

/// Tells BlueZ the agent can neither show nor type anything.
pub const CAPABILITY: &str = "NoInputNoOutput";

/// Answer to legacy PIN requests.
pub const DEFAULT_PIN: &str = "0000";

#[proxy(
    interface = "org.bluez.AgentManager1",
    default_service = "org.bluez",
    default_path = "/org/bluez"
)]
trait AgentManager1 {
    fn register_agent(&self, agent: &ObjectPath<'_>, capability: &str) -> zbus::Result<()>;
    fn request_default_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
    fn unregister_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
}

#[derive(Debug, Default)]
pub struct AutoAcceptAgent;

#[interface(name = "org.bluez.Agent1")]
impl AutoAcceptAgent {
    fn release(&self) {
        info!("Bluetooth agent released by BlueZ");
    }

    fn authorize_service(&self, device: ObjectPath<'_>, uuid: &str) {
        debug!("Agent: authorizing service {} for {}", uuid, device);
    }

    fn request_pin_code(&self, device: ObjectPath<'_>) -> String {
        debug!("Agent: PIN requested by {}", device);
        DEFAULT_PIN.to_string()
    }

    fn request_passkey(&self, device: ObjectPath<'_>) -> u32 {
        debug!("Agent: passkey requested by {}", device);
        0
    }

    fn display_passkey(&self, device: ObjectPath<'_>, passkey: u32, entered: u16) {
        debug!("Agent: passkey {:06} for {} ({} typed)", passkey, device, entered);
    }

    fn display_pin_code(&self, device: ObjectPath<'_>, pincode: &str) {
        debug!("Agent: PIN {} for {}", pincode, device);
    }

    fn request_confirmation(&self, device: ObjectPath<'_>, passkey: u32) {
        debug!("Agent: confirming passkey {:06} for {}", passkey, device);
    }

    fn request_authorization(&self, device: ObjectPath<'_>) {
        debug!("Agent: authorizing {}", device);
    }

    fn cancel(&self) {
        debug!("Agent: request cancelled");
    }
}

/// Serve the agent on `connection` (the system bus) and make it BlueZ's
/// default. Failing to become the default is only logged.
pub async fn register(connection: &Connection) -> zbus::Result<()> {
    connection.object_server().at(AGENT_PATH, AutoAcceptAgent).await?;

    let path = ObjectPath::try_from(AGENT_PATH)?;
    let manager = AgentManager1Proxy::new(connection).await?;
    manager.register_agent(&path, CAPABILITY).await?;
    if let Err(e) = manager.request_default_agent(&path).await {
        warn!("Bluetooth agent registered but not made default: {}", e);
    }

    info!("Bluetooth agent registered at {}", AGENT_PATH);
    Ok(())
}

/// Withdraw the agent from BlueZ.
pub async fn unregister(connection: &Connection) -> zbus::Result<()> {
    let path = ObjectPath::try_from(AGENT_PATH)?;
    AgentManager1Proxy::new(connection)
        .await?
        .unregister_agent(&path)
        .await
}
