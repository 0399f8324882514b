// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parsers for `hyprctl -j` output.

use super::{unreadable, usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;
use serde::Deserialize;
use shellsync_ipc::Monitor;

#[derive(Debug, Deserialize)]
struct JsonWorkspace {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonMonitor {
    id: i64,
    name: String,
    #[serde(default)]
    description: String,
    width: u32,
    height: u32,
    #[serde(default)]
    refresh_rate: f64,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    active_workspace: Option<JsonWorkspace>,
    #[serde(default)]
    disabled: bool,
}

fn default_scale() -> f64 {
    1.0
}

/// Parse `hyprctl monitors -j`, leaving out disabled outputs.
pub fn parse_monitors(out: &CommandOutput) -> ParseOutcome<Vec<Monitor>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };
    if text.trim().is_empty() {
        return ParseOutcome::Parsed(Vec::new());
    }

    match serde_json::from_str::<Vec<JsonMonitor>>(text) {
        Ok(monitors) => ParseOutcome::Parsed(
            monitors
                .into_iter()
                .filter(|m| !m.disabled)
                .map(|m| Monitor {
                    id: m.id,
                    name: m.name,
                    description: m.description,
                    width: m.width,
                    height: m.height,
                    refresh_rate: m.refresh_rate,
                    x: m.x,
                    y: m.y,
                    scale: m.scale,
                    focused: m.focused,
                    active_workspace: m.active_workspace.map(|w| w.id),
                })
                .collect(),
        ),
        Err(_) => unreadable("hyprctl monitors", out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_monitors() {
        let json = r#"[
          {"id":0,"name":"eDP-1","description":"BOE 0x0BCA","make":"BOE","width":2256,"height":1504,
           "refreshRate":59.99900,"x":0,"y":0,"activeWorkspace":{"id":3,"name":"3"},
           "scale":1.50,"transform":0,"focused":true,"dpmsStatus":true,"disabled":false},
          {"id":1,"name":"HDMI-A-1","description":"","width":1920,"height":1080,
           "refreshRate":60.0,"x":1504,"y":0,"scale":1.0,"focused":false,"disabled":true}
        ]"#;
        let monitors = parse_monitors(&CommandOutput::ok(json)).ok().unwrap();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].name, "eDP-1");
        assert_eq!(monitors[0].active_workspace, Some(3));
        assert!((monitors[0].scale - 1.5).abs() < f64::EPSILON);
        assert!(monitors[0].focused);
    }

    #[test]
    fn test_compositor_not_running() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "HYPRLAND_INSTANCE_SIGNATURE not set! (is hyprland running?)\n".to_string(),
            stderr: String::new(),
        };
        assert!(parse_monitors(&out).is_empty());
        assert!(parse_monitors(&CommandOutput::not_found("hyprctl")).is_empty());
    }
}
