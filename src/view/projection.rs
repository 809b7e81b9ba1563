//! FilteredProjection - live, filtered tree over a NodeRegistry
//!
//! The projection keeps a cache of displayed nodes with their parents and
//! children *in the view*. A node is displayed iff it passes every applied
//! filter; it sits under each of its displayed graph parents, or under the
//! view root when it has none (or when the view is flat). Each placement is
//! an occurrence, addressed by a `NodePath`.
//!
//! Raw registry events are turned into `node-*-inview` events by
//! `update_node`, which walks up to parents (their display may depend on
//! children) and down to children (they may gain or lose a displayed parent).
//!
//! Locking: registry read guard, then projection state, then filter bank.
//! Events and run-once actions are delivered after every lock is released.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, instrument, trace, warn};

use crate::error::{ArborError, Result};
use crate::event::{EventBus, EventKind, EventSink, Signal, SubscriptionId};
use crate::filter::{FilterBank, FilterParams, FilterRef};
use crate::graph::{GraphState, NodeId, NodePath, NodeRegistry, NodeView};

/// Sibling ordering supplied by the consumer
pub type Comparator<T> =
    Arc<dyn Fn(&NodeView<'_, T>, &NodeView<'_, T>) -> Ordering + Send + Sync>;

type RunOnce = Box<dyn FnOnce(&str) + Send>;

/// A filter applied to a view, with the parameters bound by that view
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFilter {
    pub name: String,
    pub params: Option<FilterParams>,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
}

struct ProjectionState<T> {
    root_id: NodeId,
    /// Displayed nodes plus the view root
    nodes: FxHashMap<NodeId, Entry>,
    applied: Vec<AppliedFilter>,
    flat: bool,
    paths: FxHashMap<NodeId, Vec<NodePath>>,
    counts: FxHashMap<(String, bool), usize>,
    comparator: Option<Comparator<T>>,
    run_once: FxHashMap<NodeId, Vec<RunOnce>>,
}

impl<T> ProjectionState<T> {
    fn new(root_id: NodeId) -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert(root_id.clone(), Entry::default());
        Self {
            root_id,
            nodes,
            applied: Vec::new(),
            flat: false,
            paths: FxHashMap::default(),
            counts: FxHashMap::default(),
            comparator: None,
            run_once: FxHashMap::default(),
        }
    }

    fn is_root(&self, node_id: &str) -> bool {
        self.root_id.as_ref() == node_id
    }

    fn is_displayed(&self, node_id: &str) -> bool {
        !self.is_root(node_id) && self.nodes.contains_key(node_id)
    }

    fn paths_for(&self, node_id: &str) -> Vec<NodePath> {
        occurrence_paths(&self.nodes, &self.root_id, node_id)
    }

    fn children(&self, node_id: &str) -> Vec<NodeId> {
        self.nodes
            .get(node_id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    fn parents(&self, node_id: &str) -> Vec<NodeId> {
        self.nodes
            .get(node_id)
            .map(|e| e.parents.clone())
            .unwrap_or_default()
    }

    /// Displayed nodes, depth-first in view order
    fn ordered_nodes(&self) -> Vec<NodeId> {
        let mut seen: FxHashSet<&NodeId> = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = self
            .nodes
            .get(&self.root_id)
            .map(|e| e.children.iter().rev().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id.clone());
            if let Some(entry) = self.nodes.get(id) {
                stack.extend(entry.children.iter().rev());
            }
        }
        out
    }
}

/// Every path from the view root down to an occurrence of `node_id`
fn occurrence_paths(nodes: &FxHashMap<NodeId, Entry>, root_id: &str, node_id: &str) -> Vec<NodePath> {
    if node_id == root_id {
        return vec![NodePath::root()];
    }
    let Some((id, entry)) = nodes.get_key_value(node_id) else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    for parent in &entry.parents {
        for parent_path in occurrence_paths(nodes, root_id, parent) {
            paths.push(parent_path.child(id.clone()));
        }
    }
    paths
}

struct ResolvedFilter<T> {
    filter: FilterRef<T>,
    params: Option<FilterParams>,
}

impl<T> ResolvedFilter<T> {
    fn matches(&self, node: &NodeView<'_, T>) -> bool {
        self.filter.matches(node, self.params.as_ref())
    }

    fn is_transparent(&self) -> bool {
        self.filter.is_transparent(self.params.as_ref())
    }
}

// ═══════════════════════════════════════════════════════════════
// Update engine (runs with the registry read-locked)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Both,
}

impl Direction {
    fn goes_up(self) -> bool {
        matches!(self, Direction::Up | Direction::Both)
    }

    fn goes_down(self) -> bool {
        matches!(self, Direction::Down | Direction::Both)
    }
}

struct Engine<'a, 'g, T> {
    state: &'a mut ProjectionState<T>,
    graph: &'g GraphState<T>,
    filters: Vec<ResolvedFilter<T>>,
    /// False when an applied filter is no longer in the bank
    usable: bool,
    memo: FxHashMap<NodeId, bool>,
    /// Nodes whose `hide` is in progress; further updates are skipped
    hiding: FxHashSet<NodeId>,
    events: Vec<EventKind>,
    ready: Vec<(NodeId, RunOnce)>,
}

impl<T> Engine<'_, '_, T> {
    /// Does the node pass every applied filter?
    fn passes(&mut self, node_id: &str) -> bool {
        if let Some(known) = self.memo.get(node_id) {
            return *known;
        }
        let graph = self.graph;
        let Some(node) = graph.view(node_id) else {
            return false;
        };
        let value = self.usable && self.filters.iter().all(|f| f.matches(&node));
        self.memo.insert(node.node().id().clone(), value);
        value
    }

    /// Displayed graph parents, or the view root
    fn node_parents(&mut self, node_id: &str) -> Vec<NodeId> {
        let graph = self.graph;
        let mut parents = Vec::new();
        if !self.state.flat {
            for parent in graph.parents_of(node_id) {
                if self.state.nodes.contains_key(parent) && self.passes(parent) {
                    parents.push(parent.clone());
                }
            }
        }
        if parents.is_empty() {
            parents.push(self.state.root_id.clone());
        }
        parents
    }

    fn node_children(&mut self, node_id: &str) -> Vec<NodeId> {
        if self.state.flat {
            return Vec::new();
        }
        let graph = self.graph;
        let mut children = Vec::new();
        for child in graph.children_of(node_id) {
            if self.passes(child) {
                children.push(child.clone());
            }
        }
        children
    }

    fn sibling_order(&self, parent_id: &str, a: &str, b: &str) -> Ordering {
        if let Some(cmp) = &self.state.comparator {
            if let (Some(va), Some(vb)) = (self.graph.view(a), self.graph.view(b)) {
                return cmp(&va, &vb);
            }
        }
        if self.state.flat || self.state.is_root(parent_id) {
            return self.graph.rank(a).cmp(&self.graph.rank(b));
        }
        let index = |id: &str| {
            self.graph
                .get(parent_id)
                .and_then(|p| p.child_index(id))
                .unwrap_or(usize::MAX)
        };
        index(a).cmp(&index(b))
    }

    /// Does a cached sibling still have a place in the registry order?
    ///
    /// Not while its own update is still pending (removed, or detached
    /// from this parent).
    fn is_placed(&self, parent_id: &str, id: &str) -> bool {
        if self.state.flat || self.state.is_root(parent_id) {
            self.graph.contains(id)
        } else {
            self.graph
                .get(parent_id)
                .is_some_and(|p| p.child_index(id).is_some())
        }
    }

    /// Insert after every placed sibling ordered at or before `child`
    fn insert_child(&mut self, parent_id: &str, child: &NodeId) {
        let pos = match self.state.nodes.get(parent_id) {
            Some(entry) if !entry.children.contains(child) => entry
                .children
                .iter()
                .position(|other| {
                    self.is_placed(parent_id, other)
                        && self.sibling_order(parent_id, other, child) == Ordering::Greater
                })
                .unwrap_or(entry.children.len()),
            _ => return,
        };
        if let Some(entry) = self.state.nodes.get_mut(parent_id) {
            entry.children.insert(pos, child.clone());
        }
    }

    fn remove_child(&mut self, parent_id: &str, child: &str) {
        if let Some(entry) = self.state.nodes.get_mut(parent_id) {
            entry.children.retain(|c| c.as_ref() != child);
        }
    }

    fn emit_added(&mut self, node_id: &NodeId, path: NodePath) {
        self.events.push(EventKind::AddedInView {
            node_id: node_id.clone(),
            path,
        });
        if let Some(actions) = self.state.run_once.remove(node_id) {
            self.ready
                .extend(actions.into_iter().map(|action| (node_id.clone(), action)));
        }
    }

    /// `added` for `node_id` and its cached subtree under every occurrence
    /// of `parent_id`, breadth-first
    fn send_add_tree(&mut self, node_id: &NodeId, parent_id: &str) {
        let parent_paths = self.state.paths_for(parent_id);
        let mut queue = VecDeque::new();
        queue.push_back((node_id.clone(), NodePath::root().child(node_id.clone())));

        while let Some((id, relative)) = queue.pop_front() {
            for start in &parent_paths {
                self.emit_added(&id, start.join(&relative));
            }
            for child in self.state.children(&id) {
                let path = relative.child(child.clone());
                queue.push_back((child, path));
            }
        }
    }

    /// `deleted` for `node_id` and its cached subtree under every occurrence
    /// of `parent_id`, children before parents
    fn send_remove_tree(&mut self, node_id: &NodeId, parent_id: &str) {
        let parent_paths = self.state.paths_for(parent_id);
        let mut stack = vec![(node_id.clone(), NodePath::root().child(node_id.clone()), true)];

        while let Some((id, relative, first_visit)) = stack.pop() {
            if first_visit {
                let children: Vec<_> = self
                    .state
                    .children(&id)
                    .into_iter()
                    .map(|child| {
                        let path = relative.child(child.clone());
                        (child, path, true)
                    })
                    .collect();
                stack.push((id, relative, false));
                stack.extend(children);
            } else {
                for start in &parent_paths {
                    self.events.push(EventKind::DeletedInView {
                        node_id: id.clone(),
                        path: start.join(&relative),
                    });
                }
            }
        }
    }

    /// Bring one node up to date and propagate in `direction`
    fn update_node(&mut self, node_id: &str, direction: Direction) {
        if self.state.is_root(node_id) || self.hiding.contains(node_id) {
            return;
        }
        let graph = self.graph;
        let id = match self
            .state
            .nodes
            .get_key_value(node_id)
            .map(|(k, _)| k.clone())
            .or_else(|| graph.get(node_id).map(|n| n.id().clone()))
        {
            Some(id) => id,
            None => return,
        };

        let current = self.state.nodes.contains_key(&id);
        let visible = self.passes(&id);
        trace!(node_id = %id, current, visible, ?direction, "update node");

        match (current, visible) {
            (false, false) => {
                // A hidden node can still change what its parents show
                for parent in graph.parents_of(&id) {
                    self.update_node(parent, Direction::Up);
                }
            }
            (true, false) => self.hide(&id),
            (false, true) => self.show(&id, direction, true),
            (true, true) => self.show(&id, direction, false),
        }
    }

    fn show(&mut self, id: &NodeId, mut direction: Direction, added: bool) {
        let graph = self.graph;
        if added {
            self.state.nodes.insert(id.clone(), Entry::default());
            let current_parents = self.state.parents(id);
            let new_parents = self.node_parents(id);
            // Parents that may not have noticed this child yet
            for parent in graph.parents_of(id) {
                if !new_parents.contains(parent) && !current_parents.contains(parent) {
                    self.update_node(parent, Direction::Up);
                }
            }
        }

        let current_parents = self.state.parents(id);
        let new_parents = self.node_parents(id);
        if let Some(entry) = self.state.nodes.get_mut(id) {
            entry.parents = new_parents.clone();
        }

        let remove_from: Vec<NodeId> = current_parents
            .iter()
            .filter(|p| !new_parents.contains(p))
            .cloned()
            .collect();
        let add_to: Vec<NodeId> = new_parents
            .iter()
            .filter(|p| !current_parents.contains(p))
            .cloned()
            .collect();
        let stay: Vec<NodeId> = new_parents
            .iter()
            .filter(|p| current_parents.contains(p))
            .cloned()
            .collect();

        if direction == Direction::Down && add_to.iter().any(|p| self.state.is_root(p)) {
            direction = Direction::Both;
        }

        for parent in &remove_from {
            self.send_remove_tree(id, parent);
            self.remove_child(parent, id);
            if direction.goes_up() {
                self.update_node(parent, Direction::Up);
            }
        }

        for parent in &add_to {
            if !self.state.nodes.contains_key(parent) {
                warn!(node_id = %id, parent_id = %parent, "parent vanished from view");
                continue;
            }
            self.insert_child(parent, id);
            self.send_add_tree(id, parent);
            if direction.goes_up() {
                self.update_node(parent, Direction::Up);
            }
        }

        if direction.goes_up() {
            for parent in &stay {
                self.update_node(parent, Direction::Up);
            }
        }

        if !added {
            for path in self.state.paths_for(id) {
                self.events.push(EventKind::ModifiedInView {
                    node_id: id.clone(),
                    path,
                });
            }
        }

        if direction.goes_down() {
            let current_children = self.state.children(id);
            for child in self.node_children(id) {
                if !current_children.contains(&child) {
                    self.update_node(&child, Direction::Down);
                }
            }
        }
    }

    fn hide(&mut self, id: &NodeId) {
        let graph = self.graph;
        self.hiding.insert(id.clone());

        let children: Vec<NodeId> = self.state.children(id).into_iter().rev().collect();
        for child in &children {
            self.send_remove_tree(child, id);
            if let Some(entry) = self.state.nodes.get_mut(child) {
                entry.parents.retain(|p| p != id);
            }
            self.remove_child(id, child);
            self.update_node(child, Direction::Down);
        }

        for path in self.state.paths_for(id) {
            self.events.push(EventKind::DeletedInView {
                node_id: id.clone(),
                path,
            });
        }

        // Detach from every occurrence before any parent is revisited
        let parents = self.state.parents(id);
        for parent in &parents {
            self.remove_child(parent, id);
        }
        self.state.nodes.remove(id);
        for parent in &parents {
            self.update_node(parent, Direction::Up);
        }

        // The node may only be hidden; its hidden parents could care
        for parent in graph.parents_of(id) {
            if !self.state.nodes.contains_key(parent) {
                self.update_node(parent, Direction::Up);
            }
        }
        self.hiding.remove(id);
    }

    /// Drop everything and rebuild from the registry root
    fn refilter(&mut self) {
        let root = self.state.root_id.clone();
        self.state.flat = self
            .filters
            .iter()
            .any(|f| f.filter.is_flat(f.params.as_ref()));

        for node in self.state.children(&root).iter().rev() {
            self.send_remove_tree(node, &root);
        }
        self.state.nodes.clear();
        self.state.nodes.insert(root, Entry::default());

        let graph = self.graph;
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&NodeId> = graph.root_children().iter().collect();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.as_ref()) {
                continue;
            }
            self.update_node(node, Direction::Both);
            queue.extend(graph.children_of(node));
        }
    }

    /// Restore the sibling order of one parent, emitting the permutation
    fn resort(&mut self, parent_id: &str) {
        let Some((parent, old)) = self
            .state
            .nodes
            .get_key_value(parent_id)
            .map(|(k, e)| (k.clone(), e.children.clone()))
        else {
            return;
        };
        let mut sorted = old.clone();
        sorted.sort_by(|a, b| self.sibling_order(parent_id, a, b));
        if sorted == old {
            return;
        }

        let new_order: Vec<usize> = sorted
            .iter()
            .filter_map(|id| old.iter().position(|o| o == id))
            .collect();
        if let Some(entry) = self.state.nodes.get_mut(parent_id) {
            entry.children = sorted;
        }
        for path in self.state.paths_for(parent_id) {
            self.events.push(EventKind::ChildrenReordered {
                node_id: parent.clone(),
                path: Some(path),
                new_order: new_order.clone(),
            });
        }
    }

    fn resort_all(&mut self) {
        let root = self.state.root_id.clone();
        self.resort(&root);
        for node in self.state.ordered_nodes() {
            self.resort(&node);
        }
    }

    fn replay(&mut self) {
        let root = self.state.root_id.clone();
        for node in self.state.children(&root) {
            self.send_add_tree(&node, &root);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// FilteredProjection (shared handle)
// ═══════════════════════════════════════════════════════════════

struct ProjectionInner<T> {
    name: Option<String>,
    registry: NodeRegistry<T>,
    bank: FilterBank<T>,
    state: Mutex<ProjectionState<T>>,
    bus: EventBus,
    subscription: SubscriptionId,
    isolate_panics: bool,
}

impl<T> Drop for ProjectionInner<T> {
    fn drop(&mut self) {
        self.registry.bus().unsubscribe(self.subscription);
    }
}

/// Filtered, ordered tree view of a registry
///
/// Cheap to clone: clones share the same view. The view stops following
/// the registry once the last clone is dropped.
pub struct FilteredProjection<T> {
    inner: Arc<ProjectionInner<T>>,
}

impl<T> Clone for FilteredProjection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> FilteredProjection<T> {
    /// Create a view; with `refresh` the current graph is loaded at once
    pub fn new(
        registry: NodeRegistry<T>,
        bank: FilterBank<T>,
        name: Option<String>,
        refresh: bool,
        isolate_panics: bool,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ProjectionInner<T>>| {
            let weak = weak.clone();
            let subscription = registry.bus().subscribe_all(move |event: &EventKind| {
                if let Some(inner) = weak.upgrade() {
                    FilteredProjection { inner }.on_raw_event(event);
                }
            });
            ProjectionInner {
                name,
                state: Mutex::new(ProjectionState::new(registry.root_id().clone())),
                registry,
                bank,
                bus: EventBus::new(isolate_panics),
                subscription,
                isolate_panics,
            }
        });

        let projection = Self { inner };
        if refresh {
            projection.refresh();
        }
        projection
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Id of the view root (the registry root id)
    pub fn root_id(&self) -> &NodeId {
        self.inner.registry.root_id()
    }

    pub fn subscribe(&self, signal: Signal, sink: impl EventSink + 'static) -> SubscriptionId {
        self.inner.bus.subscribe(signal, sink)
    }

    pub fn subscribe_all(&self, sink: impl EventSink + 'static) -> SubscriptionId {
        self.inner.bus.subscribe_all(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    fn resolve(&self, applied: &[AppliedFilter]) -> (Vec<ResolvedFilter<T>>, bool) {
        let mut usable = true;
        let filters = applied
            .iter()
            .filter_map(|a| match self.inner.bank.get(&a.name) {
                Some(filter) => Some(ResolvedFilter {
                    filter,
                    params: a.params.clone(),
                }),
                None => {
                    warn!(filter = %a.name, "applied filter is no longer registered, view shows nothing");
                    usable = false;
                    None
                }
            })
            .collect();
        (filters, usable)
    }

    /// Run an update with the registry read-locked, then deliver its output
    fn run<R>(&self, f: impl FnOnce(&mut Engine<'_, '_, T>) -> R) -> R {
        let (result, events, ready) = {
            let graph = self.inner.registry.read();
            let mut state = self.inner.state.lock();
            state.paths.clear();
            state.counts.clear();
            let (filters, usable) = self.resolve(&state.applied);

            let mut engine = Engine {
                state: &mut *state,
                graph: &*graph,
                filters,
                usable,
                memo: FxHashMap::default(),
                hiding: FxHashSet::default(),
                events: Vec::new(),
                ready: Vec::new(),
            };
            let result = f(&mut engine);
            let Engine { events, ready, .. } = engine;
            (result, events, ready)
        };

        self.inner.bus.publish_all(&events);
        for (node_id, action) in ready {
            self.run_action(&node_id, action);
        }
        result
    }

    fn run_action(&self, node_id: &str, action: RunOnce) {
        if self.inner.isolate_panics {
            if catch_unwind(AssertUnwindSafe(|| action(node_id))).is_err() {
                error!(node_id, "run-once action panicked");
            }
        } else {
            action(node_id);
        }
    }

    fn on_raw_event(&self, event: &EventKind) {
        match event {
            EventKind::NodeAdded { node_id, .. }
            | EventKind::NodeModified { node_id, .. }
            | EventKind::NodeDeleted { node_id } => {
                self.run(|engine| engine.update_node(node_id, Direction::Both));
                self.inner.bus.publish(event);
            }
            EventKind::ChildrenReordered {
                node_id,
                path: None,
                ..
            } => self.run(|engine| engine.resort(node_id)),
            _ => {}
        }
    }

    // ═══════════════════════════════════════════
    // FILTERS
    // ═══════════════════════════════════════════

    /// Add a filter (replacing all others with `reset`)
    ///
    /// Returns false, and does nothing, when the filter is already applied
    /// with the same parameters. Without `refresh` the view keeps its
    /// content until the next `refresh()`.
    #[instrument(skip(self, params), fields(view = self.name()))]
    pub fn apply_filter(
        &self,
        name: &str,
        params: Option<FilterParams>,
        reset: bool,
        refresh: bool,
    ) -> Result<bool> {
        if !self.inner.bank.has_filter(name) {
            return Err(ArborError::filter_not_found(name));
        }
        {
            let mut state = self.inner.state.lock();
            if reset {
                state.applied.clear();
            }
            match state.applied.iter_mut().find(|a| a.name == name) {
                Some(existing) if existing.params == params => return Ok(false),
                Some(existing) => existing.params = params,
                None => state.applied.push(AppliedFilter {
                    name: name.to_string(),
                    params,
                }),
            }
        }
        debug!("filter applied");
        if refresh {
            self.refresh();
        }
        Ok(true)
    }

    /// Returns false if the filter was not applied
    #[instrument(skip(self), fields(view = self.name()))]
    pub fn unapply_filter(&self, name: &str, refresh: bool) -> bool {
        {
            let mut state = self.inner.state.lock();
            let before = state.applied.len();
            state.applied.retain(|a| a.name != name);
            if state.applied.len() == before {
                return false;
            }
        }
        if refresh {
            self.refresh();
        }
        true
    }

    /// Clear applied filters, or only the transparent ones
    pub fn reset_filters(&self, refresh: bool, transparent_only: bool) {
        {
            let mut state = self.inner.state.lock();
            if transparent_only {
                let bank = &self.inner.bank;
                state.applied.retain(|a| {
                    !bank
                        .get(&a.name)
                        .is_some_and(|f| f.is_transparent(a.params.as_ref()))
                });
            } else {
                state.applied.clear();
            }
        }
        if refresh {
            self.refresh();
        }
    }

    /// Full recompute: every displayed occurrence is deleted, then the
    /// graph is walked again from the root
    pub fn refresh(&self) {
        self.run(|engine| engine.refilter());
    }

    pub fn list_applied_filters(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .applied
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn applied_filters(&self) -> Vec<AppliedFilter> {
        self.inner.state.lock().applied.clone()
    }

    pub fn is_flat(&self) -> bool {
        self.inner.state.lock().flat
    }

    /// Order siblings with `cmp` instead of registry order
    pub fn set_comparator<F>(&self, cmp: F)
    where
        F: Fn(&NodeView<'_, T>, &NodeView<'_, T>) -> Ordering + Send + Sync + 'static,
    {
        self.inner.state.lock().comparator = Some(Arc::new(cmp));
        self.run(|engine| engine.resort_all());
    }

    pub fn clear_comparator(&self) {
        self.inner.state.lock().comparator = None;
        self.run(|engine| engine.resort_all());
    }

    // ═══════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════

    pub fn is_displayed(&self, node_id: &str) -> bool {
        self.inner.state.lock().is_displayed(node_id)
    }

    /// Displayed node ids, depth-first in view order, each once
    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.inner.state.lock().ordered_nodes()
    }

    /// Paths of every occurrence; empty when the node is not displayed
    pub fn paths_for_node(&self, node_id: &str) -> Vec<NodePath> {
        let mut state = self.inner.state.lock();
        if !state.is_displayed(node_id) {
            return Vec::new();
        }
        if let Some(paths) = state.paths.get(node_id) {
            return paths.clone();
        }
        let paths = state.paths_for(node_id);
        if let Some(id) = state.nodes.get_key_value(node_id).map(|(k, _)| k.clone()) {
            state.paths.insert(id, paths.clone());
        }
        paths
    }

    /// First path of a displayed node
    pub fn any_path(&self, node_id: &str) -> Option<NodePath> {
        self.paths_for_node(node_id).into_iter().next()
    }

    pub fn node_for_path(&self, path: &NodePath) -> Result<NodeId> {
        let not_found = || ArborError::PathNotFound {
            path: path.to_string(),
        };
        let state = self.inner.state.lock();
        let mut parent = state.root_id.clone();
        for step in path.iter() {
            let entry = state.nodes.get(&parent).ok_or_else(not_found)?;
            parent = entry
                .children
                .iter()
                .find(|c| *c == step)
                .cloned()
                .ok_or_else(not_found)?;
        }
        if state.is_root(&parent) {
            return Err(not_found());
        }
        Ok(parent)
    }

    /// Children in view order; `None` is the view root
    pub fn node_children(&self, node_id: Option<&str>) -> Result<Vec<NodeId>> {
        let state = self.inner.state.lock();
        let id = node_id.unwrap_or(&*state.root_id);
        state
            .nodes
            .get(id)
            .map(|e| e.children.clone())
            .ok_or_else(|| ArborError::node_not_found(id))
    }

    /// Displayed parents; empty for nodes under the view root
    pub fn node_parents(&self, node_id: &str) -> Result<Vec<NodeId>> {
        let state = self.inner.state.lock();
        if !state.is_displayed(node_id) {
            return Err(ArborError::node_not_found(node_id));
        }
        Ok(state
            .parents(node_id)
            .into_iter()
            .filter(|p| !state.is_root(p))
            .collect())
    }

    pub fn has_child(&self, node_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .nodes
            .get(node_id)
            .is_some_and(|e| !e.children.is_empty())
    }

    /// Number of children; 0 for nodes not displayed
    ///
    /// Recursive counts every occurrence below the node.
    pub fn child_count(&self, node_id: Option<&str>, recursive: bool) -> usize {
        fn count(nodes: &FxHashMap<NodeId, Entry>, node_id: &str, recursive: bool) -> usize {
            let Some(entry) = nodes.get(node_id) else {
                return 0;
            };
            if !recursive {
                return entry.children.len();
            }
            entry
                .children
                .iter()
                .map(|c| 1 + count(nodes, c, true))
                .sum()
        }
        let state = self.inner.state.lock();
        let id = node_id.unwrap_or(&*state.root_id);
        count(&state.nodes, id, recursive)
    }

    pub fn nth_child(&self, node_id: Option<&str>, n: usize) -> Result<NodeId> {
        let state = self.inner.state.lock();
        let id = node_id.unwrap_or(&*state.root_id);
        let entry = state
            .nodes
            .get(id)
            .ok_or_else(|| ArborError::node_not_found(id))?;
        entry
            .children
            .get(n)
            .cloned()
            .ok_or_else(|| ArborError::InvalidState {
                reason: format!("'{}' has no child at index {} in the view", id, n),
            })
    }

    /// Next sibling under `parent_id` (the first view parent when `None`)
    pub fn next_node(&self, node_id: &str, parent_id: Option<&str>) -> Result<Option<NodeId>> {
        let state = self.inner.state.lock();
        let entry = state
            .nodes
            .get(node_id)
            .filter(|_| !state.is_root(node_id))
            .ok_or_else(|| ArborError::node_not_found(node_id))?;
        let parent: &str = match parent_id {
            Some(pid) if entry.parents.iter().any(|p| p.as_ref() == pid) => pid,
            Some(pid) => {
                return Err(ArborError::InvalidState {
                    reason: format!("'{}' is not a parent of '{}' in the view", pid, node_id),
                })
            }
            None => entry
                .parents
                .first()
                .map_or(state.root_id.as_ref(), |p| p.as_ref()),
        };
        let siblings = state
            .nodes
            .get(parent)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[]);
        Ok(siblings
            .iter()
            .position(|c| c.as_ref() == node_id)
            .and_then(|i| siblings.get(i + 1))
            .cloned())
    }

    /// Displayed nodes that also pass `with_filters`
    ///
    /// With `include_transparent == false`, applied filters flagged
    /// transparent are ignored. Unknown names in `with_filters` are skipped.
    pub fn count_nodes(&self, with_filters: &[&str], include_transparent: bool) -> usize {
        let graph = self.inner.registry.read();
        let mut state = self.inner.state.lock();

        let cache_key = match with_filters {
            [single] => Some((single.to_string(), include_transparent)),
            _ => None,
        };
        if let Some(count) = cache_key.as_ref().and_then(|k| state.counts.get(k)) {
            return *count;
        }

        let (applied, usable) = self.resolve(&state.applied);
        let extra: Vec<FilterRef<T>> = with_filters
            .iter()
            .filter_map(|name| self.inner.bank.get(name))
            .collect();
        let passes_extra = |node: &NodeView<'_, T>| extra.iter().all(|f| f.matches(node, None));

        let count = if !include_transparent && applied.iter().any(|f| f.is_transparent()) {
            let opaque: Vec<&ResolvedFilter<T>> =
                applied.iter().filter(|f| !f.is_transparent()).collect();
            if usable {
                graph
                    .ids_by_rank()
                    .iter()
                    .filter_map(|id| graph.view(id))
                    .filter(|node| opaque.iter().all(|f| f.matches(node)) && passes_extra(node))
                    .count()
            } else {
                0
            }
        } else {
            state
                .nodes
                .keys()
                .filter(|id| !state.is_root(id))
                .filter_map(|id| graph.view(id))
                .filter(|node| passes_extra(node))
                .count()
        };

        if let Some(key) = cache_key {
            state.counts.insert(key, count);
        }
        count
    }

    // ═══════════════════════════════════════════
    // CONSUMER SYNC
    // ═══════════════════════════════════════════

    /// Replay `added` for every displayed occurrence
    pub fn emit_current_state(&self) {
        self.run(|engine| engine.replay());
    }

    /// Run `action` now if the node is displayed, otherwise the first time
    /// it becomes displayed
    pub fn queue_action(&self, node_id: &str, action: impl FnOnce(&str) + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.is_displayed(node_id) {
            drop(state);
            self.run_action(node_id, Box::new(action));
        } else {
            state
                .run_once
                .entry(NodeId::from(node_id))
                .or_default()
                .push(Box::new(action));
        }
    }

    /// Indented rendering, one line per occurrence
    pub fn print_tree(&self) -> String {
        let state = self.inner.state.lock();
        let mut out = String::new();
        let mut stack: Vec<(&NodeId, usize)> = vec![(&state.root_id, 0)];
        while let Some((id, depth)) = stack.pop() {
            let _ = writeln!(out, "{}{}", " ".repeat(depth), id);
            if let Some(entry) = state.nodes.get(id) {
                stack.extend(entry.children.iter().rev().map(|c| (c, depth + 1)));
            }
        }
        out
    }

    /// Check the cache: parent/child symmetry, no orphans, no duplicates
    pub fn validate(&self) -> Result<()> {
        let state = self.inner.state.lock();
        let invalid = |reason: String| Err(ArborError::InvalidState { reason });

        for (id, entry) in &state.nodes {
            if entry.parents.is_empty() && !state.is_root(id) {
                return invalid(format!("'{}' has no parent in the view", id));
            }
            for parent in &entry.parents {
                let listed = state
                    .nodes
                    .get(parent)
                    .is_some_and(|p| p.children.contains(id));
                if !listed {
                    return invalid(format!("'{}' is not a child of '{}'", id, parent));
                }
            }
            for (i, child) in entry.children.iter().enumerate() {
                if entry.children[..i].contains(child) {
                    return invalid(format!("'{}' is listed twice under '{}'", child, id));
                }
                let listed = state
                    .nodes
                    .get(child)
                    .is_some_and(|c| c.parents.contains(id));
                if !listed {
                    return invalid(format!("'{}' is not a parent of '{}'", id, child));
                }
            }
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for FilteredProjection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FilteredProjection")
            .field("name", &self.inner.name)
            .field("displayed", &state.nodes.len().saturating_sub(1))
            .field("applied", &state.applied)
            .finish()
    }
}
