// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Compositor settings kept in a `$name = value` variables file.
//!
//! A change is applied to the running compositor through `hyprctl keyword`
//! (throttled, batched) and written back to the file with `sed` (debounced,
//! batched). The file is the source of truth for the snapshot.

use super::{run_mutation, snapshot_json, DomainHandler, HandlerError};
use crate::config::AppConfig;
use crate::exec::{CommandRunner, CommandSpec};
use crate::parse::variables::{self, is_valid_name};
use crate::refresh::{RefreshChain, Step};
use crate::scheduler::{MutationScheduler, Policy};
use crate::store::StateStore;
use futures::future::BoxFuture;
use shellsync_ipc::{CompositorState, ConfigVariable, Domain};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct CompositorHandler {
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<CompositorState>>,
    chain: Arc<RefreshChain<CompositorState>>,
    /// Keyword -> value, applied live.
    live: MutationScheduler<String, String>,
    /// Variable -> value, written to the file.
    persist: MutationScheduler<String, String>,
    keywords: BTreeMap<String, String>,
    hyprctl: String,
}

impl CompositorHandler {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Self {
        let tools = &config.tools;
        let path = config.compositor.variables_path.clone();
        let store = Arc::new(StateStore::default());
        let chain = Arc::new(build_chain(&tools.cat, &path, Arc::clone(&runner), Arc::clone(&store)));

        let live = {
            let runner = Arc::clone(&runner);
            let hyprctl = tools.hyprctl.clone();
            MutationScheduler::new(
                "compositor keywords",
                Policy::Throttle(config.timing.keyword_throttle()),
                Arc::new(move |batch: Vec<(String, String)>| -> BoxFuture<'static, ()> {
                    let runner = Arc::clone(&runner);
                    let spec = keyword_batch(&hyprctl, &batch);
                    Box::pin(async move {
                        run_mutation(runner.as_ref(), spec).await;
                    })
                }),
            )
        };

        let persist = {
            let runner = Arc::clone(&runner);
            let chain = Arc::clone(&chain);
            let sed = tools.sed.clone();
            MutationScheduler::new(
                "compositor file",
                Policy::DebounceBatch(config.timing.persist_debounce()),
                Arc::new(move |batch: Vec<(String, String)>| -> BoxFuture<'static, ()> {
                    let runner = Arc::clone(&runner);
                    let chain = Arc::clone(&chain);
                    let spec = rewrite_command(&sed, &path, &batch);
                    Box::pin(async move {
                        run_mutation(runner.as_ref(), spec).await;
                        chain.request();
                    })
                }),
            )
        };

        Self {
            runner,
            store,
            chain,
            live,
            persist,
            keywords: config.compositor.keywords.clone(),
            hyprctl: tools.hyprctl.clone(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore<CompositorState>> {
        &self.store
    }

    /// Change one variable.
    ///
    /// Variables that are bound to a compositor keyword take effect
    /// immediately; all of them are written to the file once edits stop.
    /// Only existing `$name = ...` lines are rewritten.
    pub fn set_setting(&self, name: &str, value: &str) -> Result<(), HandlerError> {
        if !is_valid_name(name) {
            return Err(HandlerError::InvalidVariableName(name.to_string()));
        }
        if value.contains(['\n', '\r']) {
            return Err(HandlerError::InvalidValue(format!("{}: value spans lines", name)));
        }
        let keyword = self.keywords.get(name);
        if keyword.is_some() && value.contains(';') {
            return Err(HandlerError::InvalidValue(format!("{}: ';' is not allowed", name)));
        }
        let value = value.trim();

        self.store.update(|s| {
            match s.variables.iter_mut().find(|v| v.name == name) {
                Some(var) => var.value = value.to_string(),
                None => s.variables.push(ConfigVariable {
                    name: name.to_string(),
                    value: value.to_string(),
                }),
            }
        });

        if let Some(keyword) = keyword {
            self.live.push(keyword.clone(), value.to_string());
        } else {
            debug!("${} has no live keyword; only writing it to the file", name);
        }
        self.persist.push(name.to_string(), value.to_string());
        Ok(())
    }

    /// Ask the compositor to reload its configuration.
    pub async fn reload(&self) {
        run_mutation(self.runner.as_ref(), CommandSpec::new(&self.hyprctl).arg("reload")).await;
        self.chain.request();
    }
}

impl DomainHandler for CompositorHandler {
    fn domain(&self) -> Domain {
        Domain::Compositor
    }

    fn request_refresh(&self) {
        self.chain.request();
    }

    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.chain.refresh())
    }

    fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        snapshot_json(Domain::Compositor, &self.store.current())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.live.flush().await;
            self.persist.flush().await;
        })
    }
}

// ==================== Commands ====================

/// `hyprctl --batch "keyword a 1 ; keyword b 2"`.
fn keyword_batch(hyprctl: &str, batch: &[(String, String)]) -> CommandSpec {
    let script = batch
        .iter()
        .map(|(keyword, value)| format!("keyword {} {}", keyword, value))
        .collect::<Vec<_>>()
        .join(" ; ");
    CommandSpec::new(hyprctl).arg("--batch").arg(script)
}

/// Escape text for the replacement half of a `s/…/…/` expression.
fn sed_replacement(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '/' | '&') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One `sed -i` call rewriting every variable in `batch` in place.
fn rewrite_command(sed: &str, path: &Path, batch: &[(String, String)]) -> CommandSpec {
    let mut spec = CommandSpec::new(sed).arg("-i");
    for (name, value) in batch {
        spec = spec.arg("-e").arg(format!(
            r"s/^[[:space:]]*\${name}[[:space:]]*=.*$/${name} = {value}/",
            name = name,
            value = sed_replacement(value)
        ));
    }
    spec.arg(path.to_string_lossy())
}

fn build_chain(
    cat: &str,
    path: &Path,
    runner: Arc<dyn CommandRunner>,
    store: Arc<StateStore<CompositorState>>,
) -> RefreshChain<CompositorState> {
    let read = CommandSpec::new(cat).arg(path.to_string_lossy());

    RefreshChain::new("compositor", runner, store).step(Step::new(
        "variables",
        move |_| read.clone(),
        variables::parse_variables,
        |s: &mut CompositorState, v| s.variables = v,
    ))
}
