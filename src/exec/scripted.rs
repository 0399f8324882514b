// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scripted command runner for tests.

use super::{CommandOutput, CommandRunner, CommandSpec};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Rule {
    pattern: String,
    output: CommandOutput,
    delay: Duration,
}

/// Answers commands from a table of substring rules and records every call.
///
/// The first rule whose pattern occurs in the rendered command line wins.
/// Unmatched commands behave like a missing program.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the response for `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.respond_after(pattern, output, Duration::ZERO)
    }

    /// Like [`respond`](Self::respond), completing only after `delay`.
    pub fn respond_after(&self, pattern: &str, output: CommandOutput, delay: Duration) -> &Self {
        let mut rules = self.rules.lock();
        let rule = Rule {
            pattern: pattern.to_string(),
            output,
            delay,
        };
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: CommandSpec) -> BoxFuture<'static, CommandOutput> {
        let line = spec.command_line();
        self.calls.lock().push(line.clone());

        let (output, delay) = self
            .rules
            .lock()
            .iter()
            .find(|r| line.contains(&r.pattern))
            .map(|r| (r.output.clone(), r.delay))
            .unwrap_or_else(|| (CommandOutput::not_found(&spec.program), Duration::ZERO));

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            output
        })
    }
}
