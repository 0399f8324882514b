// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio devices and per-application streams through `pactl`.

use super::{run_mutation, snapshot_json, DomainHandler, HandlerError};
use crate::config::AppConfig;
use crate::exec::{shell_quote, CommandRunner, CommandSpec};
use crate::parse::pactl;
use crate::refresh::{RefreshChain, Step};
use crate::scheduler::{MutationScheduler, Policy};
use crate::store::StateStore;
use futures::future::BoxFuture;
use shellsync_ipc::{clamp_percent, AudioState, AudioTarget, Device, DeviceKind, Domain, Stream};
use std::sync::Arc;
use tracing::debug;

pub struct SoundHandler {
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<AudioState>>,
    chain: Arc<RefreshChain<AudioState>>,
    volume: MutationScheduler<AudioTarget, u8>,
    pactl: String,
}

impl SoundHandler {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        let pactl = config.tools.pactl.clone();
        let store = Arc::new(StateStore::default());
        let chain = Arc::new(build_chain(&pactl, Arc::clone(&runner), Arc::clone(&store)));

        let volume = {
            let runner = Arc::clone(&runner);
            let chain = Arc::clone(&chain);
            let pactl = pactl.clone();
            MutationScheduler::new(
                "sound volume",
                Policy::Debounce(config.timing.volume_debounce()),
                Arc::new(move |batch: Vec<(AudioTarget, u8)>| -> BoxFuture<'static, ()> {
                    let runner = Arc::clone(&runner);
                    let chain = Arc::clone(&chain);
                    let pactl = pactl.clone();
                    Box::pin(async move {
                        for (target, percent) in batch {
                            run_mutation(runner.as_ref(), volume_command(&pactl, &target, percent))
                                .await;
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
            volume,
            pactl,
        }
    }

    pub fn store(&self) -> &Arc<StateStore<AudioState>> {
        &self.store
    }

    fn pactl(&self) -> CommandSpec {
        CommandSpec::new(&self.pactl)
    }

    /// Make `id` the default sink or source.
    pub async fn set_default_device(&self, kind: DeviceKind, id: &str) {
        let verb = match kind {
            DeviceKind::Sink => "set-default-sink",
            DeviceKind::Source => "set-default-source",
        };
        self.store.update(|s| {
            let (devices, default) = match kind {
                DeviceKind::Sink => (&mut s.sinks, &mut s.default_sink),
                DeviceKind::Source => (&mut s.sources, &mut s.default_source),
            };
            *default = Some(id.to_string());
            for device in devices.iter_mut() {
                device.is_default = device.id == id;
            }
        });

        run_mutation(self.runner.as_ref(), self.pactl().arg(verb).arg(id)).await;
        self.chain.request();
    }

    /// Set a volume in percent. Out-of-range values are clamped. The store
    /// changes immediately; the command goes out once the target has been
    /// quiet for the debounce window.
    pub fn set_volume(&self, target: AudioTarget, percent: i64) {
        let percent = clamp_percent(percent);
        self.store.update(|s| set_volume_in(s, &target, percent));
        debug!("Volume {} -> {}%", target, percent);
        self.volume.push(target, percent);
    }

    pub async fn toggle_mute(&self, target: AudioTarget) {
        self.store.update(|s| toggle_mute_in(s, &target));
        let (noun, id) = target_args(&target);
        let spec = self.pactl().arg(format!("set-{}-mute", noun)).arg(id).arg("toggle");
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
    }

    /// Move a stream to another device of the same direction.
    pub async fn move_stream(&self, stream: AudioTarget, device_id: &str) -> Result<(), HandlerError> {
        let (verb, index) = match stream {
            AudioTarget::SinkInput(index) => ("move-sink-input", index),
            AudioTarget::SourceOutput(index) => ("move-source-output", index),
            other => return Err(HandlerError::NotAStream(other.to_string())),
        };
        if device_id.is_empty() {
            return Err(HandlerError::InvalidValue("empty device id".to_string()));
        }

        self.store.update(|s| {
            let streams = match stream {
                AudioTarget::SinkInput(_) => &mut s.sink_inputs,
                _ => &mut s.source_outputs,
            };
            if let Some(st) = streams.iter_mut().find(|st| st.index == index) {
                st.parent_device_id = device_id.to_string();
            }
        });

        let spec = self.pactl().arg(verb).arg(index.to_string()).arg(device_id);
        run_mutation(self.runner.as_ref(), spec).await;
        self.chain.request();
        Ok(())
    }
}

impl DomainHandler for SoundHandler {
    fn domain(&self) -> Domain {
        Domain::Sound
    }

    fn request_refresh(&self) {
        self.chain.request();
    }

    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.chain.refresh())
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        snapshot_json(Domain::Sound, &self.store.current())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.volume.flush())
    }
}

// ==================== Commands ====================

/// The `pactl` noun and identifier for a target.
fn target_args(target: &AudioTarget) -> (&'static str, String) {
    match target {
        AudioTarget::Sink(name) => ("sink", name.clone()),
        AudioTarget::Source(name) => ("source", name.clone()),
        AudioTarget::SinkInput(index) => ("sink-input", index.to_string()),
        AudioTarget::SourceOutput(index) => ("source-output", index.to_string()),
    }
}

fn volume_command(pactl: &str, target: &AudioTarget, percent: u8) -> CommandSpec {
    let (noun, id) = target_args(target);
    CommandSpec::new(pactl)
        .arg(format!("set-{}-volume", noun))
        .arg(id)
        .arg(format!("{}%", percent))
}

/// `pactl -f json list <what>`, falling back to the text listing.
fn listing(pactl: &str, what: &str) -> CommandSpec {
    let json = CommandSpec::new(pactl).args(["-f", "json", "list", what]);
    CommandSpec::fallback(&json, &format!("{} list {}", shell_quote(pactl), what))
}

/// `pactl get-default-<kind>`, falling back to scraping `pactl info`.
fn default_query(pactl: &str, kind: DeviceKind) -> CommandSpec {
    let (noun, label) = match kind {
        DeviceKind::Sink => ("sink", "Sink"),
        DeviceKind::Source => ("source", "Source"),
    };
    let direct = CommandSpec::new(pactl).arg(format!("get-default-{}", noun));
    CommandSpec::fallback(
        &direct,
        &format!(
            "{} info | awk -F': ' '/^Default {}/ {{print $2}}'",
            shell_quote(pactl),
            label
        ),
    )
}

fn build_chain(
    pactl: &str,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<AudioState>>,
) -> RefreshChain<AudioState> {
    let default_sink = default_query(pactl, DeviceKind::Sink);
    let default_source = default_query(pactl, DeviceKind::Source);
    let sinks = listing(pactl, "sinks");
    let sources = listing(pactl, "sources");
    let sink_inputs = listing(pactl, "sink-inputs");
    let source_outputs = listing(pactl, "source-outputs");

    RefreshChain::new("sound", runner, store)
        .step(Step::new(
            "default sink",
            move |_| default_sink.clone(),
            pactl::parse_default_device,
            |s: &mut AudioState, v| s.default_sink = Some(v),
        ))
        .step(Step::new(
            "default source",
            move |_| default_source.clone(),
            pactl::parse_default_device,
            |s: &mut AudioState, v| s.default_source = Some(v),
        ))
        .step(Step::new(
            "sinks",
            move |_| sinks.clone(),
            pactl::parse_sinks,
            |s: &mut AudioState, v| s.sinks = v,
        ))
        .step(Step::new(
            "sources",
            move |_| sources.clone(),
            pactl::parse_sources,
            |s: &mut AudioState, v| s.sources = v,
        ))
        .step(Step::new(
            "sink inputs",
            move |_| sink_inputs.clone(),
            pactl::parse_streams,
            |s: &mut AudioState, v| s.sink_inputs = pactl::attach_streams(v, &s.sinks),
        ))
        .step(Step::new(
            "source outputs",
            move |_| source_outputs.clone(),
            pactl::parse_streams,
            |s: &mut AudioState, v| s.source_outputs = pactl::attach_streams(v, &s.sources),
        ))
        .finish(mark_defaults)
}

// ==================== State edits ====================

fn mark_defaults(state: &mut AudioState) {
    for sink in &mut state.sinks {
        sink.is_default = state.default_sink.as_deref() == Some(sink.id.as_str());
    }
    for source in &mut state.sources {
        source.is_default = state.default_source.as_deref() == Some(source.id.as_str());
    }
}

enum Entry<'a> {
    Device(&'a mut Device),
    Stream(&'a mut Stream),
}

fn entry_mut<'a>(state: &'a mut AudioState, target: &AudioTarget) -> Option<Entry<'a>> {
    match target {
        AudioTarget::Sink(id) => state.sinks.iter_mut().find(|d| d.id == *id).map(Entry::Device),
        AudioTarget::Source(id) => state.sources.iter_mut().find(|d| d.id == *id).map(Entry::Device),
        AudioTarget::SinkInput(index) => state
            .sink_inputs
            .iter_mut()
            .find(|s| s.index == *index)
            .map(Entry::Stream),
        AudioTarget::SourceOutput(index) => state
            .source_outputs
            .iter_mut()
            .find(|s| s.index == *index)
            .map(Entry::Stream),
    }
}

fn set_volume_in(state: &mut AudioState, target: &AudioTarget, percent: u8) {
    match entry_mut(state, target) {
        Some(Entry::Device(device)) => device.volume = Some(percent),
        Some(Entry::Stream(stream)) => stream.volume = percent,
        None => {}
    }
}

fn toggle_mute_in(state: &mut AudioState, target: &AudioTarget) {
    match entry_mut(state, target) {
        Some(Entry::Device(device)) => device.muted = !device.muted,
        Some(Entry::Stream(stream)) => stream.muted = !stream.muted,
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use crate::exec::CommandOutput;
    use std::time::Duration;
    use tokio::time::sleep;

    const SINKS: &str = r#"[
      {"index":56,"name":"sink0","description":"Speakers","mute":false,
       "volume":{"front-left":{"value_percent":"40%"},"front-right":{"value_percent":"40%"}}},
      {"index":57,"name":"sink1","description":"Headphones","mute":false,
       "volume":{"mono":{"value_percent":"70%"}}}
    ]"#;

    const SOURCES: &str = r#"[
      {"index":58,"name":"sink0.monitor","mute":false,"volume":{}},
      {"index":59,"name":"mic0","description":"Mic","mute":false,
       "volume":{"mono":{"value_percent":"90%"}}}
    ]"#;

    const SINK_INPUTS: &str = r#"[
      {"index":77,"sink":57,"mute":false,"volume":{"mono":{"value_percent":"65%"}},
       "properties":{"application.name":"Firefox"}}
    ]"#;

    fn scripted() -> ScriptedRunner {
        let runner = ScriptedRunner::new();
        runner.respond("get-default-sink", CommandOutput::ok("sink0\n"));
        runner.respond("get-default-source", CommandOutput::ok("mic0\n"));
        runner.respond("list sinks", CommandOutput::ok(SINKS));
        runner.respond("list sources", CommandOutput::ok(SOURCES));
        runner.respond("list sink-inputs", CommandOutput::ok(SINK_INPUTS));
        runner.respond("list source-outputs", CommandOutput::ok("[]"));
        runner.respond("set-", CommandOutput::ok(""));
        runner.respond("move-", CommandOutput::ok(""));
        runner
    }

    fn handler(runner: &ScriptedRunner) -> SoundHandler {
        SoundHandler::new(Arc::new(runner.clone()), &AppConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_builds_snapshot() {
        let runner = scripted();
        let sound = handler(&runner);
        sound.refresh().await;

        let snapshot = sound.store().current();
        let state = &snapshot.state;
        assert_eq!(state.sinks.len(), 2);
        assert!(state.sinks[0].is_default);
        assert!(!state.sinks[1].is_default);
        assert_eq!(state.sources.len(), 1);
        assert!(state.sources[0].is_default);
        assert_eq!(state.sink_inputs[0].parent_device_id, "sink1");
        assert!(snapshot.stale.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_fallback_when_json_is_unsupported() {
        let runner = ScriptedRunner::new();
        // The composite command only reaches the text listing when the JSON
        // form fails, so the runner sees it as one shell invocation.
        runner.respond(
            "list sinks 2>/dev/null || pactl list sinks",
            CommandOutput::ok(
                "Sink #1\n\tName: sink0\n\tMute: no\n\tVolume: mono: 1 /  30% / 0 dB\n\
                 Sink #2\n\tDriver: x\n\
                 Sink #3\n\tName: sink1\n\tMute: yes\n\tVolume: mono: 1 /  60% / 0 dB\n",
            ),
        );
        let sound = handler(&runner);
        sound.refresh().await;

        let sinks = &sound.store().current().state.sinks;
        assert_eq!(sinks.len(), 2);
        assert_eq!(sinks[0].volume, Some(30));
        assert!(sinks[1].muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_drag_sends_one_command() {
        let runner = scripted();
        let sound = handler(&runner);
        sound.refresh().await;
        runner.clear_calls();

        let target = AudioTarget::Sink("sink0".into());
        for i in 0..40 {
            let value = if i == 39 { 37 } else { 20 + i };
            sound.set_volume(target.clone(), value);
            sleep(Duration::from_millis(7)).await;
        }
        assert_eq!(sound.store().current().state.sinks[0].volume, Some(37));
        sleep(Duration::from_millis(200)).await;

        assert_eq!(runner.count("set-sink-volume"), 1);
        assert_eq!(runner.count("pactl set-sink-volume sink0 37%"), 1);
        // The dispatch is followed by a refresh.
        assert!(runner.count("list sinks") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_is_clamped() {
        let runner = scripted();
        let sound = handler(&runner);

        sound.set_volume(AudioTarget::Sink("sink0".into()), 150);
        sound.set_volume(AudioTarget::SinkInput(77), -5);
        sleep(Duration::from_millis(200)).await;

        assert_eq!(runner.count("pactl set-sink-volume sink0 100%"), 1);
        assert_eq!(runner.count("pactl set-sink-input-volume 77 0%"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_mute_then_refresh_reflects_daemon() {
        let runner = scripted();
        let sound = handler(&runner);
        sound.refresh().await;
        runner.clear_calls();

        // The daemon refuses; the refresh after the toggle wins.
        sound.toggle_mute(AudioTarget::Sink("sink0".into())).await;
        assert!(sound.store().current().state.sinks[0].muted);
        sound.refresh().await;

        let calls = runner.calls();
        assert_eq!(calls[0], "pactl set-sink-mute sink0 toggle");
        assert!(calls[1..].iter().any(|c| c.contains("list sinks")));
        assert!(!sound.store().current().state.sinks[0].muted);

        runner.respond(
            "list sinks",
            CommandOutput::ok(SINKS.replacen("\"mute\":false", "\"mute\":true", 1)),
        );
        sound.refresh().await;
        assert!(sound.store().current().state.sinks[0].muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_default_and_move_stream() {
        let runner = scripted();
        let sound = handler(&runner);
        sound.refresh().await;

        sound.set_default_device(DeviceKind::Sink, "sink1").await;
        assert!(sound.store().current().state.sinks[1].is_default);
        assert_eq!(runner.count("pactl set-default-sink sink1"), 1);

        sound
            .move_stream(AudioTarget::SinkInput(77), "sink0")
            .await
            .unwrap();
        assert_eq!(runner.count("pactl move-sink-input 77 sink0"), 1);

        let err = sound
            .move_stream(AudioTarget::Sink("sink0".into()), "sink1")
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotAStream(_)));
    }
}
