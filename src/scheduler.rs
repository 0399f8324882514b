// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rate limiting for high-frequency mutations.
//!
//! Pushes are grouped and held until a timer fires. Only the latest value per
//! key survives inside a group, so a slider dragged through forty positions
//! produces one command with the final value. A group never dispatches while
//! its previous dispatch is still running; values pushed in the meantime are
//! held and go out, in order, once the running dispatch completes.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// When a group's pending values are handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// One group per key. Fires after the key has been quiet for the window.
    Debounce(Duration),
    /// A single group for all keys. Fires after every key has been quiet for
    /// the window.
    DebounceBatch(Duration),
    /// A single group for all keys. Fires one window after the first push,
    /// however many pushes follow.
    Throttle(Duration),
}

impl Policy {
    fn window(self) -> Duration {
        match self {
            Policy::Debounce(d) | Policy::DebounceBatch(d) | Policy::Throttle(d) => d,
        }
    }

    fn per_key(self) -> bool {
        matches!(self, Policy::Debounce(_))
    }

    fn restarts_on_push(self) -> bool {
        !matches!(self, Policy::Throttle(_))
    }
}

/// Receives one batch of `(key, value)` pairs, in first-push order.
pub type Dispatch<K, V> = Arc<dyn Fn(Vec<(K, V)>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Group<K, V> {
    pending: Vec<(K, V)>,
    /// Bumped every time a timer is armed; stale timers compare and bail.
    generation: u64,
    armed: bool,
    in_flight: bool,
}

impl<K, V> Default for Group<K, V> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            generation: 0,
            armed: false,
            in_flight: false,
        }
    }
}

struct Inner<K, V> {
    name: &'static str,
    policy: Policy,
    dispatch: Dispatch<K, V>,
    /// `None` is the shared group used by the batching policies.
    groups: Mutex<HashMap<Option<K>, Group<K, V>>>,
}

/// Coalesces pushed values and dispatches them according to a [`Policy`].
pub struct MutationScheduler<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for MutationScheduler<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> MutationScheduler<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    pub fn new(name: &'static str, policy: Policy, dispatch: Dispatch<K, V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                policy,
                dispatch,
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record `value` for `key`. A later push for the same key replaces the
    /// earlier value but keeps its place in the batch.
    pub fn push(&self, key: K, value: V) {
        let group_key = self.inner.policy.per_key().then(|| key.clone());
        let mut groups = self.inner.groups.lock();
        let group = groups.entry(group_key.clone()).or_default();

        match group.pending.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => group.pending.push((key, value)),
        }

        if group.in_flight {
            trace!("{}: held while dispatch is running", self.inner.name);
            return;
        }
        if group.armed && !self.inner.policy.restarts_on_push() {
            return;
        }

        let generation = Inner::arm(group);
        drop(groups);
        Inner::schedule(Arc::clone(&self.inner), group_key, generation);
    }

    /// Number of values waiting to be dispatched.
    pub fn pending_len(&self) -> usize {
        self.inner.groups.lock().values().map(|g| g.pending.len()).sum()
    }

    /// Dispatch everything that is waiting, without waiting for timers.
    ///
    /// Groups whose dispatch is still running are skipped; their held values
    /// go out when that dispatch completes.
    pub async fn flush(&self) {
        let batches: Vec<(Option<K>, Vec<(K, V)>)> = {
            let mut groups = self.inner.groups.lock();
            groups
                .iter_mut()
                .filter(|(_, g)| !g.in_flight && !g.pending.is_empty())
                .map(|(key, g)| {
                    g.generation += 1;
                    g.armed = false;
                    g.in_flight = true;
                    (key.clone(), std::mem::take(&mut g.pending))
                })
                .collect()
        };

        for (group_key, batch) in batches {
            debug!("{}: flushing {} pending value(s)", self.inner.name, batch.len());
            (self.inner.dispatch)(batch).await;
            Inner::settle(Arc::clone(&self.inner), group_key);
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn arm(group: &mut Group<K, V>) -> u64 {
        group.generation += 1;
        group.armed = true;
        group.generation
    }

    fn schedule(inner: Arc<Self>, group_key: Option<K>, generation: u64) {
        let window = inner.policy.window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            Self::fire(inner, group_key, generation).await;
        });
    }

    fn fire(inner: Arc<Self>, group_key: Option<K>, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let batch = {
                let mut groups = inner.groups.lock();
                let Some(group) = groups.get_mut(&group_key) else {
                    return;
                };
                if !group.armed || group.generation != generation {
                    return;
                }
                group.armed = false;
                if group.pending.is_empty() {
                    return;
                }
                group.in_flight = true;
                std::mem::take(&mut group.pending)
            };

            trace!("{}: dispatching {} value(s)", inner.name, batch.len());
            (inner.dispatch)(batch).await;

            Self::settle(inner, group_key);
        })
    }

    /// Clear the in-flight mark after a dispatch. Values pushed meanwhile
    /// get a fresh timer; an empty group is dropped.
    fn settle(inner: Arc<Self>, group_key: Option<K>) {
        let rearm = {
            let mut groups = inner.groups.lock();
            let mut rearm = None;
            let mut idle = false;
            if let Some(group) = groups.get_mut(&group_key) {
                group.in_flight = false;
                if group.pending.is_empty() {
                    idle = true;
                } else {
                    rearm = Some(Self::arm(group));
                }
            }
            if idle {
                groups.remove(&group_key);
            }
            rearm
        };

        if let Some(generation) = rearm {
            trace!("{}: re-arming for values held during dispatch", inner.name);
            Self::schedule(inner, group_key, generation);
        }
    }
}
