// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ShellSync - desktop state kept in sync with command-line tools.
//!
//! Each domain (sound, Bluetooth, network, display, compositor settings) is
//! read by running tools such as `pactl` or `nmcli` and parsing their output
//! into a snapshot. Changes go out as commands, rate limited where the UI
//! produces bursts, and are followed by a refresh.

pub mod agent;
pub mod config;
pub mod dbus;
pub mod exec;
pub mod handlers;
pub mod parse;
pub mod refresh;
pub mod scheduler;
pub mod store;
