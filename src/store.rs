// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Observable per-domain state.

use std::sync::Arc;
use tokio::sync::watch;

/// One published version of a domain's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot<S> {
    pub state: S,
    /// Increases by one on every publish or optimistic update.
    pub generation: u64,
    /// Labels of refresh steps that degraded during the last refresh run.
    /// Their fields still hold the previous value.
    pub stale: Vec<String>,
}

/// Holds the current snapshot and notifies subscribers of every change.
///
/// Readers always see a complete snapshot: a refresh run builds its result
/// off to the side and swaps it in with a single publish.
pub struct StateStore<S> {
    tx: watch::Sender<Arc<Snapshot<S>>>,
}

impl<S: Clone + Default + Send + Sync + 'static> Default for StateStore<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: Clone + Send + Sync + 'static> StateStore<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot {
            state: initial,
            generation: 0,
            stale: Vec::new(),
        }));
        Self { tx }
    }

    pub fn current(&self) -> Arc<Snapshot<S>> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot<S>>> {
        self.tx.subscribe()
    }

    /// Replace the whole state, as a refresh run does.
    pub fn publish(&self, state: S, stale: Vec<String>) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|snapshot| {
            generation = snapshot.generation + 1;
            *snapshot = Arc::new(Snapshot {
                state,
                generation,
                stale,
            });
        });
        generation
    }

    /// Apply an optimistic edit ahead of the next refresh.
    pub fn update(&self, edit: impl FnOnce(&mut S)) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|snapshot| {
            let mut next = Snapshot::clone(snapshot);
            edit(&mut next.state);
            next.generation += 1;
            generation = next.generation;
            *snapshot = Arc::new(next);
        });
        generation
    }
}
