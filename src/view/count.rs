//! ViewCount - live number of nodes passing a set of filters
//!
//! No tree, no paths: the counter follows raw registry events, keeps the
//! ids that pass its filters, and calls back whenever the number changes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, error, warn};

use crate::error::{ArborError, Result};
use crate::event::{EventKind, SubscriptionId};
use crate::filter::FilterBank;
use crate::graph::{NodeId, NodeRegistry};

type CountCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Handle returned by `on_change`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Default)]
struct CountState {
    applied: Vec<String>,
    counted: FxHashSet<NodeId>,
    loaded: bool,
}

#[derive(Clone, Copy)]
enum Scope<'a> {
    Node(&'a str),
    Counted,
    All,
}

struct CountInner<T> {
    name: Option<String>,
    registry: NodeRegistry<T>,
    bank: FilterBank<T>,
    state: Mutex<CountState>,
    callbacks: Mutex<Vec<(CallbackId, CountCallback)>>,
    next_callback: AtomicU64,
    subscription: SubscriptionId,
    isolate_panics: bool,
}

impl<T> Drop for CountInner<T> {
    fn drop(&mut self) {
        self.registry.bus().unsubscribe(self.subscription);
    }
}

/// Live counter over a registry
///
/// Clones share the same counter.
pub struct ViewCount<T> {
    inner: Arc<CountInner<T>>,
}

impl<T> Clone for ViewCount<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ViewCount<T> {
    pub fn new(
        registry: NodeRegistry<T>,
        bank: FilterBank<T>,
        name: Option<String>,
        refresh: bool,
        isolate_panics: bool,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CountInner<T>>| {
            let weak = weak.clone();
            let subscription = registry.bus().subscribe_all(move |event: &EventKind| {
                if let Some(inner) = weak.upgrade() {
                    ViewCount { inner }.on_raw_event(event);
                }
            });
            CountInner {
                name,
                registry,
                bank,
                state: Mutex::new(CountState::default()),
                callbacks: Mutex::new(Vec::new()),
                next_callback: AtomicU64::new(1),
                subscription,
                isolate_panics,
            }
        });

        let count = Self { inner };
        if refresh {
            count.update(Scope::All);
        }
        count
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn count(&self) -> usize {
        self.inner.state.lock().counted.len()
    }

    pub fn list_applied_filters(&self) -> Vec<String> {
        self.inner.state.lock().applied.clone()
    }

    /// Returns false when the filter was already applied
    pub fn apply_filter(&self, name: &str, refresh: bool) -> Result<bool> {
        if !self.inner.bank.has_filter(name) {
            return Err(ArborError::filter_not_found(name));
        }
        let loaded = {
            let mut state = self.inner.state.lock();
            if state.applied.iter().any(|a| a == name) {
                return Ok(false);
            }
            state.applied.push(name.to_string());
            state.loaded
        };
        if refresh {
            // Another filter can only shrink a loaded set
            self.update(if loaded { Scope::Counted } else { Scope::All });
        }
        Ok(true)
    }

    /// Returns false when the filter was not applied
    pub fn unapply_filter(&self, name: &str) -> bool {
        {
            let mut state = self.inner.state.lock();
            let before = state.applied.len();
            state.applied.retain(|a| a != name);
            if state.applied.len() == before {
                return false;
            }
        }
        self.update(Scope::All);
        true
    }

    /// Re-evaluate one node
    pub fn modify(&self, node_id: &str) {
        self.update(Scope::Node(node_id));
    }

    /// Called with the new count every time it changes
    pub fn on_change(&self, f: impl Fn(usize) + Send + Sync + 'static) -> CallbackId {
        let id = CallbackId(self.inner.next_callback.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.lock().push((id, Arc::new(f)));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(c, _)| *c != id);
        callbacks.len() != before
    }

    fn on_raw_event(&self, event: &EventKind) {
        match event {
            EventKind::NodeAdded { node_id, .. }
            | EventKind::NodeModified { node_id, .. }
            | EventKind::NodeDeleted { node_id } => self.update(Scope::Node(node_id)),
            _ => {}
        }
    }

    fn update(&self, scope: Scope<'_>) {
        let changed = {
            let graph = self.inner.registry.read();
            let mut state = self.inner.state.lock();

            let mut usable = true;
            let mut filters = Vec::with_capacity(state.applied.len());
            for name in &state.applied {
                match self.inner.bank.get(name) {
                    Some(filter) => filters.push(filter),
                    None => {
                        warn!(filter = %name, "applied filter is no longer registered, counting nothing");
                        usable = false;
                    }
                }
            }
            let passes = |id: &str| {
                usable
                    && graph
                        .view(id)
                        .is_some_and(|node| filters.iter().all(|f| f.matches(&node, None)))
            };

            let before = state.counted.len();
            match scope {
                Scope::Node(id) => match graph.get(id) {
                    Some(node) if passes(id) => {
                        state.counted.insert(node.id().clone());
                    }
                    _ => {
                        state.counted.remove(id);
                    }
                },
                Scope::Counted => {
                    state.counted.retain(|id| passes(&**id));
                }
                Scope::All => {
                    state.counted = graph
                        .ids_by_rank()
                        .into_iter()
                        .filter(|id| passes(&**id))
                        .collect();
                    state.loaded = true;
                }
            }
            let after = state.counted.len();
            (after != before).then_some(after)
        };

        if let Some(count) = changed {
            debug!(counter = self.name(), count, "count changed");
            self.notify(count);
        }
    }

    fn notify(&self, count: usize) {
        let callbacks: Vec<CountCallback> = self
            .inner
            .callbacks
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for callback in callbacks {
            if self.inner.isolate_panics {
                if catch_unwind(AssertUnwindSafe(|| callback(count))).is_err() {
                    error!(counter = self.name(), "count callback panicked");
                }
            } else {
                callback(count);
            }
        }
    }
}

impl<T> std::fmt::Debug for ViewCount<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ViewCount")
            .field("name", &self.inner.name)
            .field("count", &state.counted.len())
            .field("applied", &state.applied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, Priority};

    fn setup() -> (NodeRegistry<u32>, FilterBank<u32>) {
        let registry = NodeRegistry::new();
        let bank = FilterBank::new(registry.clone(), true);
        bank.register_fn("even", |n| n.data() % 2 == 0).unwrap();
        for (id, value) in [("a", 1), ("b", 2), ("c", 4)] {
            registry.add(Node::new(id, value), None, Priority::Low).unwrap();
        }
        (registry, bank)
    }

    #[test]
    fn counts_follow_registry_edits() {
        let (registry, bank) = setup();
        let count = ViewCount::new(registry.clone(), bank, None, true, true);
        assert_eq!(count.count(), 3);
        count.apply_filter("even", true).unwrap();
        assert_eq!(count.count(), 2);

        registry.add(Node::new("d", 6), None, Priority::Low).unwrap();
        assert_eq!(count.count(), 3);
        registry.modify_with("b", Priority::Low, |v| *v = 3).unwrap();
        assert_eq!(count.count(), 2);
        registry.remove("c", false).unwrap();
        assert_eq!(count.count(), 1);

        assert!(count.unapply_filter("even"));
        assert_eq!(count.count(), 3);
    }

    #[test]
    fn callbacks_fire_only_on_change() {
        let (registry, bank) = setup();
        let count = ViewCount::new(registry.clone(), bank, Some("evens".into()), false, true);
        count.apply_filter("even", true).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = count.on_change(move |n| sink.lock().push(n));

        registry.modify("b", Priority::Low).unwrap();
        registry.add(Node::new("odd", 7), None, Priority::Low).unwrap();
        registry.add(Node::new("e", 8), None, Priority::Low).unwrap();
        assert_eq!(*seen.lock(), vec![3]);

        assert!(count.remove_callback(id));
        registry.remove("e", false).unwrap();
        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(count.count(), 2);
    }

    #[test]
    fn unknown_filter_is_an_error() {
        let (registry, bank) = setup();
        let count = ViewCount::new(registry, bank, None, true, true);
        let err = count.apply_filter("nope", true).unwrap_err();
        assert_eq!(err.code(), "ARBOR-020");
        assert!(count.apply_filter("even", true).unwrap());
        assert!(!count.apply_filter("even", true).unwrap());
        assert_eq!(count.count(), 2);
    }
}
