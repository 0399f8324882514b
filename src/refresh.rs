// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sequential refresh pipelines.
//!
//! A [`RefreshChain`] runs a fixed list of command + parser steps one after
//! another against a private draft of the domain state, then publishes the
//! draft to the [`StateStore`] in one swap. A step whose tool is missing or
//! whose output cannot be parsed leaves its field at the previous value and
//! the chain moves on to the next step.

use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::parse::ParseOutcome;
use crate::store::StateStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

type CommandFn<S> = Box<dyn Fn(&S) -> CommandSpec + Send + Sync>;
type ApplyFn<S> = Box<dyn Fn(&mut S, &CommandOutput) -> bool + Send + Sync>;
type FinishFn<S> = Box<dyn Fn(&mut S) + Send + Sync>;

/// Where a chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    NotStarted,
    /// Running the step at this index.
    Running(usize),
    Complete,
}

/// One command, the parser for its output, and the field it fills.
pub struct Step<S> {
    label: &'static str,
    command: CommandFn<S>,
    apply: ApplyFn<S>,
}

impl<S> Step<S> {
    /// `command` sees the draft as filled in by the earlier steps of the
    /// same run. `assign` is only called when `parse` produced a value.
    pub fn new<T, C, P, A>(label: &'static str, command: C, parse: P, assign: A) -> Self
    where
        T: 'static,
        C: Fn(&S) -> CommandSpec + Send + Sync + 'static,
        P: Fn(&CommandOutput) -> ParseOutcome<T> + Send + Sync + 'static,
        A: Fn(&mut S, T) + Send + Sync + 'static,
    {
        Self {
            label,
            command: Box::new(command),
            apply: Box::new(move |state, out| match parse(out) {
                ParseOutcome::Parsed(value) => {
                    assign(state, value);
                    true
                }
                ParseOutcome::Empty => false,
            }),
        }
    }
}

struct Control {
    phase: ChainPhase,
    rerun: bool,
    started: u64,
}

pub struct RefreshChain<S> {
    name: &'static str,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<S>>,
    steps: Vec<Step<S>>,
    finish: Option<FinishFn<S>>,
    control: Mutex<Control>,
    completed: watch::Sender<u64>,
}

impl<S: Clone + Send + Sync + 'static> RefreshChain<S> {
    pub fn new(name: &'static str, runner: Arc<dyn CommandRunner>, store: Arc<StateStore<S>>) -> Self {
        let (completed, _rx) = watch::channel(0);
        Self {
            name,
            runner,
            store,
            steps: Vec::new(),
            finish: None,
            control: Mutex::new(Control {
                phase: ChainPhase::NotStarted,
                rerun: false,
                started: 0,
            }),
            completed,
        }
    }

    pub fn step(mut self, step: Step<S>) -> Self {
        self.steps.push(step);
        self
    }

    /// Derived fields computed from the finished draft, before publishing.
    pub fn finish(mut self, finish: impl Fn(&mut S) + Send + Sync + 'static) -> Self {
        self.finish = Some(Box::new(finish));
        self
    }

    pub fn phase(&self) -> ChainPhase {
        self.control.lock().phase
    }

    /// Number of completed runs.
    pub fn runs(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Start a run, or mark one to follow the run in progress.
    pub fn request(self: &Arc<Self>) {
        self.schedule();
    }

    /// Like [`request`](Self::request), then wait until a run that began
    /// after this call has published.
    pub async fn refresh(self: &Arc<Self>) {
        let mut rx = self.completed.subscribe();
        let target = self.schedule();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done >= target).await;
    }

    /// Returns the number of the run that will satisfy this request.
    fn schedule(self: &Arc<Self>) -> u64 {
        let mut control = self.control.lock();
        let target = control.started + 1;

        if matches!(control.phase, ChainPhase::Running(_)) {
            if !control.rerun {
                debug!("{} refresh requested while running; queuing one rerun", self.name);
            }
            control.rerun = true;
            return target;
        }

        control.started = target;
        control.phase = ChainPhase::Running(0);
        drop(control);

        tokio::spawn(Arc::clone(self).drive());
        target
    }

    async fn drive(self: Arc<Self>) {
        loop {
            self.run_once().await;

            let mut control = self.control.lock();
            if control.rerun {
                control.rerun = false;
                control.started += 1;
                control.phase = ChainPhase::Running(0);
            } else {
                control.phase = ChainPhase::Complete;
                break;
            }
        }
    }

    async fn run_once(&self) {
        let mut draft = self.store.current().state.clone();
        let mut stale = Vec::new();
        debug!("{} refresh started", self.name);

        for (index, step) in self.steps.iter().enumerate() {
            self.control.lock().phase = ChainPhase::Running(index);

            let output = self.runner.run((step.command)(&draft)).await;
            if !(step.apply)(&mut draft, &output) {
                warn!(
                    "{} refresh: step '{}' degraded (exit {}), keeping previous value",
                    self.name, step.label, output.exit_code
                );
                stale.push(step.label.to_string());
            }
        }

        if let Some(finish) = &self.finish {
            finish(&mut draft);
        }

        let generation = self.store.publish(draft, stale);
        self.completed.send_modify(|done| *done += 1);
        debug!("{} refresh complete (generation {})", self.name, generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Probe {
        names: Vec<String>,
        detail: String,
        count: usize,
    }

    fn lines(out: &CommandOutput) -> ParseOutcome<Vec<String>> {
        if out.success() {
            ParseOutcome::Parsed(out.stdout.lines().map(str::to_string).collect())
        } else {
            ParseOutcome::Empty
        }
    }

    fn text(out: &CommandOutput) -> ParseOutcome<String> {
        if out.success() {
            ParseOutcome::Parsed(out.stdout.trim().to_string())
        } else {
            ParseOutcome::Empty
        }
    }

    fn chain(runner: &ScriptedRunner, store: &Arc<StateStore<Probe>>) -> Arc<RefreshChain<Probe>> {
        let runner: Arc<dyn CommandRunner> = Arc::new(runner.clone());
        Arc::new(
            RefreshChain::new("probe", runner, Arc::clone(store))
                .step(Step::new(
                    "names",
                    |_: &Probe| CommandSpec::new("list-names"),
                    lines,
                    |s: &mut Probe, v| s.names = v,
                ))
                .step(Step::new(
                    "detail",
                    |s: &Probe| {
                        CommandSpec::new("show-detail").arg(s.names.first().cloned().unwrap_or_default())
                    },
                    text,
                    |s: &mut Probe, v| s.detail = v,
                ))
                .finish(|s| s.count = s.names.len()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order_and_publish_once() {
        let runner = ScriptedRunner::new();
        runner.respond("list-names", CommandOutput::ok("alpha\nbeta\n"));
        runner.respond("show-detail alpha", CommandOutput::ok("first\n"));
        let store = Arc::new(StateStore::default());
        let chain = chain(&runner, &store);
        assert_eq!(chain.phase(), ChainPhase::NotStarted);

        chain.refresh().await;

        assert_eq!(runner.calls(), vec!["list-names", "show-detail alpha"]);
        let snapshot = store.current();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.state.detail, "first");
        assert_eq!(snapshot.state.count, 2);
        assert!(snapshot.stale.is_empty());
        assert_eq!(chain.runs(), 1);
        assert_eq!(chain.phase(), ChainPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_keeps_previous_value_and_continues() {
        let runner = ScriptedRunner::new();
        runner.respond("list-names", CommandOutput::ok("alpha\n"));
        runner.respond("show-detail", CommandOutput::ok("first\n"));
        let store = Arc::new(StateStore::default());
        let chain = chain(&runner, &store);
        chain.refresh().await;

        runner.respond("list-names", CommandOutput::not_found("list-names"));
        runner.respond("show-detail", CommandOutput::ok("second\n"));
        chain.refresh().await;

        let snapshot = store.current();
        assert_eq!(snapshot.state.names, vec!["alpha".to_string()]);
        assert_eq!(snapshot.state.detail, "second");
        assert_eq!(snapshot.stale, vec!["names".to_string()]);
        assert_eq!(runner.count("show-detail"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_run_coalesce_into_one_rerun() {
        let runner = ScriptedRunner::new();
        runner.respond_after("list-names", CommandOutput::ok("alpha\n"), Duration::from_millis(100));
        runner.respond("show-detail", CommandOutput::ok("x\n"));
        let store = Arc::new(StateStore::default());
        let chain = chain(&runner, &store);

        chain.request();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(chain.phase(), ChainPhase::Running(0));
        chain.request();
        chain.request();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(chain.runs(), 2);
        assert_eq!(runner.count("list-names"), 2);
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readers_never_see_a_partial_snapshot() {
        let runner = ScriptedRunner::new();
        runner.respond("list-names", CommandOutput::ok("alpha\n"));
        runner.respond_after("show-detail", CommandOutput::ok("first\n"), Duration::from_millis(100));
        let store = Arc::new(StateStore::default());
        let chain = chain(&runner, &store);

        chain.request();
        sleep(Duration::from_millis(50)).await;
        // Names have been parsed into the draft but not published.
        assert_eq!(chain.phase(), ChainPhase::Running(1));
        assert_eq!(*store.current(), Default::default());

        sleep(Duration::from_millis(100)).await;
        let snapshot = store.current();
        assert_eq!(snapshot.state.names, vec!["alpha".to_string()]);
        assert_eq!(snapshot.state.detail, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_the_queued_rerun() {
        let runner = ScriptedRunner::new();
        runner.respond_after("list-names", CommandOutput::ok("alpha\n"), Duration::from_millis(100));
        runner.respond("show-detail", CommandOutput::ok("old\n"));
        let store = Arc::new(StateStore::default());
        let chain = chain(&runner, &store);

        chain.request();
        sleep(Duration::from_millis(10)).await;
        runner.respond("show-detail", CommandOutput::ok("new\n"));
        chain.refresh().await;

        assert_eq!(chain.runs(), 2);
        assert_eq!(store.current().state.detail, "new");
    }
}
