// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Monitors through `hyprctl` and backlight through `brightnessctl`.

use super::{run_mutation, snapshot_json, DomainHandler, HandlerError};
use crate::config::AppConfig;
use crate::exec::{CommandRunner, CommandSpec};
use crate::parse::{brightness, hyprctl};
use crate::refresh::{RefreshChain, Step};
use crate::scheduler::{MutationScheduler, Policy};
use crate::store::StateStore;
use futures::future::BoxFuture;
use shellsync_ipc::{clamp_percent, Brightness, DisplayState, Domain, MonitorSettings};
use std::sync::Arc;

pub struct DisplayHandler {
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<DisplayState>>,
    chain: Arc<RefreshChain<DisplayState>>,
    brightness: MutationScheduler<(), u8>,
    hyprctl: String,
}

impl DisplayHandler {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        let hyprctl = config.tools.hyprctl.clone();
        let brightnessctl = config.tools.brightnessctl.clone();
        let store = Arc::new(StateStore::default());
        let chain = Arc::new(build_chain(
            &hyprctl,
            &brightnessctl,
            Arc::clone(&runner),
            Arc::clone(&store),
        ));

        let brightness = {
            let runner = Arc::clone(&runner);
            let chain = Arc::clone(&chain);
            MutationScheduler::new(
                "brightness",
                Policy::Debounce(config.timing.brightness_debounce()),
                Arc::new(move |batch: Vec<((), u8)>| -> BoxFuture<'static, ()> {
                    let runner = Arc::clone(&runner);
                    let chain = Arc::clone(&chain);
                    let brightnessctl = brightnessctl.clone();
                    Box::pin(async move {
                        if let Some(&(_, percent)) = batch.last() {
                            let spec = CommandSpec::new(brightnessctl)
                                .arg("set")
                                .arg(format!("{}%", percent));
                            run_mutation(runner.as_ref(), spec).await;
                        }
                        chain.request();
                    })
                }),
            )
        };

        Self {
            runner,
            store,
            chain,
            brightness,
            hyprctl,
        }
    }

    pub fn store(&self) -> &Arc<StateStore<DisplayState>> {
        &self.store
    }

    /// Set the backlight in percent (clamped). Debounced.
    pub fn set_brightness(&self, percent: i64) {
        let percent = clamp_percent(percent);
        self.store.update(|s| {
            if let Some(b) = s.brightness.as_mut() {
                b.percent = percent;
                b.current = (b.max as u64 * percent as u64 / 100) as u32;
            }
        });
        self.brightness.push((), percent);
    }

    pub async fn apply_monitor_settings(&self, settings: MonitorSettings) -> Result<(), HandlerError> {
        let rule = monitor_rule(&settings)?;
        self.store.update(|s| {
            if let Some(m) = s.monitors.iter_mut().find(|m| m.name == settings.name) {
                m.width = settings.width;
                m.height = settings.height;
                m.refresh_rate = settings.refresh_rate;
                m.x = settings.x;
                m.y = settings.y;
                m.scale = settings.scale;
            }
        });

        let spec = CommandSpec::new(&self.hyprctl).args(["keyword", "monitor"]).arg(rule);
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
        Ok(())
    }
}

impl DomainHandler for DisplayHandler {
    fn domain(&self) -> Domain {
        Domain::Display
    }

    fn request_refresh(&self) {
        self.chain.request();
    }

    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.chain.refresh())
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        snapshot_json(Domain::Display, &self.store.current())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.brightness.flush())
    }
}

/// Render `name,WxH@R,XxY,scale` for `hyprctl keyword monitor`.
fn monitor_rule(s: &MonitorSettings) -> Result<String, HandlerError> {
    let invalid = |why: &str| Err(HandlerError::InvalidMonitor(format!("{}: {}", s.name, why)));

    if s.name.is_empty() || s.name.contains([',', '\n']) {
        return invalid("bad output name");
    }
    if s.width == 0 || s.height == 0 {
        return invalid("zero resolution");
    }
    if !(s.refresh_rate.is_finite() && s.refresh_rate > 0.0) {
        return invalid("refresh rate must be positive");
    }
    if !(s.scale.is_finite() && s.scale > 0.0) {
        return invalid("scale must be positive");
    }

    Ok(format!(
        "{},{}x{}@{},{}x{},{}",
        s.name, s.width, s.height, s.refresh_rate, s.x, s.y, s.scale
    ))
}

fn build_chain(
    hyprctl: &str,
    brightnessctl: &str,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<DisplayState>>,
) -> RefreshChain<DisplayState> {
    let monitors = CommandSpec::new(hyprctl).args(["monitors", "-j"]);
    let current = CommandSpec::new(brightnessctl).arg("get");
    let max = CommandSpec::new(brightnessctl).arg("max");

    RefreshChain::new("display", runner, store)
        .step(Step::new(
            "monitors",
            move |_| monitors.clone(),
            hyprctl::parse_monitors,
            |s: &mut DisplayState, v| s.monitors = v,
        ))
        .step(Step::new(
            "brightness",
            move |_| current.clone(),
            brightness::parse_raw,
            |s: &mut DisplayState, v| s.brightness.get_or_insert_with(Brightness::default).current = v,
        ))
        .step(Step::new(
            "max brightness",
            move |_| max.clone(),
            brightness::parse_raw,
            |s: &mut DisplayState, v| s.brightness.get_or_insert_with(Brightness::default).max = v,
        ))
        .finish(|s| {
            if let Some(b) = s.brightness.as_mut() {
                *b = Brightness::from_raw(b.current, b.max);
            }
        })
}
