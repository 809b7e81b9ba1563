//! NodeRegistry - canonical DAG storage
//!
//! Owns every node, keeps parent/child lists mutually consistent and rejects
//! any relationship that would make a node its own ancestor.
//!
//! Every mutation follows the same shape:
//! 1. take the write lock and validate (errors leave the graph untouched)
//! 2. mutate, collecting raw events
//! 3. release the lock, then publish the events in order
//!
//! Subscribers (projections included) can therefore read the registry while
//! they are being notified.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument, warn};

use super::node::{Node, NodeView, Priority};
use super::path::NodePath;
use super::NodeId;
use crate::config::ArborConfig;
use crate::error::{ArborError, Result};
use crate::event::{EventBus, EventKind, EventSink, Signal, SubscriptionId};
use crate::util::Interner;

// ═══════════════════════════════════════════════════════════════
// Graph state (behind the lock)
// ═══════════════════════════════════════════════════════════════

pub(crate) struct GraphState<T> {
    root_id: NodeId,
    nodes: FxHashMap<NodeId, Node<T>>,
    /// Parentless nodes, sorted by rank
    root_children: Vec<NodeId>,
    /// (parent, child) relationships waiting for a missing endpoint
    pending: Vec<(NodeId, NodeId)>,
    next_rank: u64,
}

impl<T> GraphState<T> {
    fn new(root_id: NodeId) -> Self {
        Self {
            root_id,
            nodes: FxHashMap::default(),
            root_children: Vec::new(),
            pending: Vec::new(),
            next_rank: 0,
        }
    }

    pub(crate) fn is_root(&self, node_id: &str) -> bool {
        self.root_id.as_ref() == node_id
    }

    pub(crate) fn get(&self, node_id: &str) -> Option<&Node<T>> {
        self.nodes.get(node_id)
    }

    pub(crate) fn view(&self, node_id: &str) -> Option<NodeView<'_, T>> {
        self.nodes.get(node_id).map(|node| NodeView::new(node, self))
    }

    pub(crate) fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Children of a node, or the parentless nodes for the root id
    pub(crate) fn children_of(&self, node_id: &str) -> &[NodeId] {
        if self.is_root(node_id) {
            &self.root_children
        } else {
            self.nodes.get(node_id).map(|n| n.children()).unwrap_or(&[])
        }
    }

    pub(crate) fn parents_of(&self, node_id: &str) -> &[NodeId] {
        self.nodes.get(node_id).map(|n| n.parents()).unwrap_or(&[])
    }

    pub(crate) fn root_children(&self) -> &[NodeId] {
        &self.root_children
    }

    /// Insertion sequence; root children are kept in this order
    pub(crate) fn rank(&self, node_id: &str) -> u64 {
        self.nodes.get(node_id).map_or(u64::MAX, |n| n.rank)
    }

    /// All node ids in insertion order
    pub(crate) fn ids_by_rank(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort_by_key(|id| self.rank(id));
        ids
    }

    /// BFS upwards from `node_id` looking for `ancestor`
    pub(crate) fn is_ancestor_or_self<'a>(&'a self, ancestor: &str, node_id: &'a str) -> bool {
        if ancestor == node_id {
            return true;
        }
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(node_id);

        while let Some(current) = queue.pop_front() {
            for parent in self.parents_of(current) {
                if parent.as_ref() == ancestor {
                    return true;
                }
                if visited.insert(parent.as_ref()) {
                    queue.push_back(parent.as_ref());
                }
            }
        }
        false
    }

    /// Every root-to-node path through the registry
    pub(crate) fn paths_for(&self, node_id: &str) -> Vec<NodePath> {
        if self.is_root(node_id) {
            return vec![NodePath::root()];
        }
        let Some(node) = self.nodes.get(node_id) else {
            return Vec::new();
        };
        if node.parents.is_empty() {
            return vec![NodePath::root().child(node.id.clone())];
        }
        let mut paths = Vec::new();
        for parent in &node.parents {
            for parent_path in self.paths_for(parent) {
                paths.push(parent_path.child(node.id.clone()));
            }
        }
        paths
    }

    /// Node at the end of `path`, if every step is a real parent/child link
    pub(crate) fn resolve_path(&self, path: &NodePath) -> Option<NodeId> {
        let mut parent = self.root_id.clone();
        for step in path.iter() {
            let child = self.children_of(&parent).iter().find(|c| *c == step)?;
            parent = child.clone();
        }
        Some(parent)
    }

    fn next_rank(&mut self) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    fn check_link(&self, parent_id: &str, child_id: &str) -> Result<()> {
        let parent = self
            .get(parent_id)
            .ok_or_else(|| ArborError::node_not_found(parent_id))?;
        let child = self
            .get(child_id)
            .ok_or_else(|| ArborError::node_not_found(child_id))?;
        if !parent.children_allowed {
            return Err(ArborError::ChildrenNotAllowed {
                node_id: parent_id.to_string(),
            });
        }
        if !child.parents_allowed {
            return Err(ArborError::ParentsNotAllowed {
                node_id: child_id.to_string(),
            });
        }
        if self.is_ancestor_or_self(child_id, parent_id) {
            return Err(ArborError::CycleDetected {
                parent_id: parent_id.to_string(),
                child_id: child_id.to_string(),
            });
        }
        Ok(())
    }

    /// Unchecked; both ends must exist
    fn link(&mut self, parent_id: &str, child_id: &str) {
        let (Some(parent), Some(child)) = (
            self.nodes.get(parent_id).map(|n| n.id.clone()),
            self.nodes.get(child_id).map(|n| n.id.clone()),
        ) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            if !node.children.contains(&child) {
                node.children.push(child.clone());
            }
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            if !node.parents.contains(&parent) {
                node.parents.push(parent);
            }
        }
        self.root_children.retain(|id| *id != child);
    }

    fn unlink(&mut self, parent_id: &str, child_id: &str) -> bool {
        let mut changed = false;
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            let before = parent.children.len();
            parent.children.retain(|c| c.as_ref() != child_id);
            changed |= parent.children.len() != before;
        }
        if let Some(child) = self.nodes.get_mut(child_id) {
            let before = child.parents.len();
            child.parents.retain(|p| p.as_ref() != parent_id);
            changed |= child.parents.len() != before;
        }
        changed
    }

    fn attach_to_root(&mut self, node_id: &str) {
        let Some(id) = self.nodes.get(node_id).map(|n| n.id.clone()) else {
            return;
        };
        if self.root_children.contains(&id) {
            return;
        }
        let rank = self.rank(&id);
        let pos = self
            .root_children
            .partition_point(|other| self.rank(other) < rank);
        self.root_children.insert(pos, id);
    }

    fn is_orphan(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .is_some_and(|n| n.parents.is_empty())
    }

    /// Detach `node_id` everywhere and drop it, children first when recursive
    fn remove_subtree(
        &mut self,
        node_id: &str,
        recursive: bool,
        priority: Priority,
        removed: &mut Vec<NodeId>,
        events: &mut Vec<EventKind>,
    ) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };
        let id = node.id.clone();
        let parents = node.parents.clone();
        let children = node.children.clone();

        for parent in &parents {
            self.unlink(parent, &id);
            events.push(EventKind::NodeModified {
                node_id: parent.clone(),
                priority,
            });
        }

        for child in &children {
            self.unlink(&id, child);
            if self.is_orphan(child) {
                if recursive {
                    self.remove_subtree(child, true, priority, removed, events);
                    continue;
                }
                self.attach_to_root(child);
            }
            events.push(EventKind::NodeModified {
                node_id: child.clone(),
                priority,
            });
        }

        self.nodes.remove(&id);
        self.root_children.retain(|r| *r != id);
        self.pending.retain(|(p, c)| *p != id && *c != id);
        removed.push(id);
    }
}

// ═══════════════════════════════════════════════════════════════
// NodeRegistry (shared handle)
// ═══════════════════════════════════════════════════════════════

/// Canonical node store
///
/// Cheap to clone: clones share the same graph, bus and interner.
pub struct NodeRegistry<T> {
    state: Arc<RwLock<GraphState<T>>>,
    bus: Arc<EventBus>,
    interner: Arc<Interner>,
    root_id: NodeId,
    default_priority: Priority,
}

impl<T> Clone for NodeRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            bus: Arc::clone(&self.bus),
            interner: Arc::clone(&self.interner),
            root_id: self.root_id.clone(),
            default_priority: self.default_priority,
        }
    }
}

impl<T> Default for NodeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NodeRegistry<T> {
    pub fn new() -> Self {
        Self::with_config(&ArborConfig::default())
    }

    pub fn with_config(config: &ArborConfig) -> Self {
        let interner = Arc::new(Interner::new());
        let root_id = interner.intern(&config.root_id);
        Self {
            state: Arc::new(RwLock::new(GraphState::new(root_id.clone()))),
            bus: Arc::new(EventBus::new(config.isolate_panics)),
            interner,
            root_id,
            default_priority: config.default_priority,
        }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root_id
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority
    }

    /// Shared read access; recursive so a subscriber may read while an
    /// outer read guard is alive on the same thread
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphState<T>> {
        self.state.read_recursive()
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn subscribe(&self, signal: Signal, sink: impl EventSink + 'static) -> SubscriptionId {
        self.bus.subscribe(signal, sink)
    }

    pub fn subscribe_all(&self, sink: impl EventSink + 'static) -> SubscriptionId {
        self.bus.subscribe_all(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn commit(&self, events: Vec<EventKind>) {
        if !events.is_empty() {
            self.bus.publish_all(&events);
        }
    }

    // ═══════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════

    /// Insert a node under `parent_id` (root when `None`)
    ///
    /// A parent that does not exist yet is remembered: the node goes under
    /// root and moves below the parent once that one is added.
    /// A present parent that cannot take the node (capability flags or a
    /// cycle through adopted children) fails the whole call and leaves the
    /// registry untouched.
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    pub fn add(&self, mut node: Node<T>, parent_id: Option<&str>, priority: Priority) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();

            if graph.is_root(&node.id) {
                return Err(ArborError::ReservedId {
                    node_id: node.id.to_string(),
                });
            }
            if graph.contains(&node.id) {
                return Err(ArborError::DuplicateId {
                    node_id: node.id.to_string(),
                });
            }

            let parent_id = parent_id.filter(|p| !graph.is_root(p));
            let waiting_children: Vec<NodeId> = graph
                .pending
                .iter()
                .filter(|(p, c)| *p == node.id && graph.contains(c))
                .map(|(_, c)| c.clone())
                .collect();

            // Every explicitly requested parent is validated before any change
            let requested: Vec<&str> = parent_id
                .into_iter()
                .chain(node.requested_parents.iter().map(|p| &**p))
                .filter(|p| !graph.is_root(p))
                .collect();
            for pid in requested {
                if pid == node.id.as_ref() {
                    return Err(ArborError::CycleDetected {
                        parent_id: pid.to_string(),
                        child_id: pid.to_string(),
                    });
                }
                let Some(parent) = graph.get(pid) else {
                    continue;
                };
                if !parent.children_allowed {
                    return Err(ArborError::ChildrenNotAllowed {
                        node_id: pid.to_string(),
                    });
                }
                if !node.parents_allowed {
                    return Err(ArborError::ParentsNotAllowed {
                        node_id: node.id.to_string(),
                    });
                }
                if node.children_allowed
                    && waiting_children
                        .iter()
                        .any(|c| graph.is_ancestor_or_self(c, pid))
                {
                    return Err(ArborError::CycleDetected {
                        parent_id: pid.to_string(),
                        child_id: node.id.to_string(),
                    });
                }
            }

            let id = self.interner.intern(&node.id);
            let requested = std::mem::take(&mut node.requested_parents);
            node.id = id.clone();
            node.parents.clear();
            node.children.clear();
            node.rank = graph.next_rank();

            let mut parents: Vec<NodeId> = graph
                .pending
                .iter()
                .filter(|(_, c)| *c == id)
                .map(|(p, _)| p.clone())
                .collect();
            for requested_parent in requested
                .into_iter()
                .chain(parent_id.map(NodeId::from))
            {
                if !parents.contains(&requested_parent) {
                    parents.push(requested_parent);
                }
            }

            graph.pending.retain(|(p, c)| *p != id && *c != id);
            graph.nodes.insert(id.clone(), node);

            // Children first: parent links are then checked against them
            let mut adopted = Vec::new();
            for child in waiting_children {
                match graph.check_link(&id, &child) {
                    Ok(()) => {
                        graph.link(&id, &child);
                        adopted.push(child);
                    }
                    Err(err) => {
                        warn!(parent_id = %id, child_id = %child, error = %err, "dropping pending relationship")
                    }
                }
            }

            let mut attached = false;
            for parent in parents {
                if graph.is_root(&parent) {
                    continue;
                }
                if !graph.contains(&parent) {
                    debug!(parent_id = %parent, "parent not present yet, relationship pending");
                    graph.pending.push((parent, id.clone()));
                    continue;
                }
                match graph.check_link(&parent, &id) {
                    Ok(()) => {
                        graph.link(&parent, &id);
                        attached = true;
                    }
                    // Only relationships recorded by earlier calls get here
                    Err(err) => {
                        warn!(parent_id = %parent, child_id = %id, error = %err, "dropping pending relationship")
                    }
                }
            }
            if !attached {
                graph.attach_to_root(&id);
            }

            events.push(EventKind::NodeAdded {
                node_id: id,
                priority,
            });
            events.extend(
                adopted
                    .into_iter()
                    .map(|node_id| EventKind::NodeModified { node_id, priority }),
            );
        }
        self.commit(events);
        Ok(())
    }

    /// Remove a node
    ///
    /// Recursive mode also removes children left without any parent;
    /// otherwise orphaned children go back to root. Returns the removed ids,
    /// deepest first (the order of the `node-deleted` events).
    #[instrument(skip(self))]
    pub fn remove(&self, node_id: &str, recursive: bool) -> Result<Vec<NodeId>> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        let mut removed = Vec::new();
        {
            let mut graph = self.state.write();
            if graph.is_root(node_id) {
                return Err(ArborError::ReservedId {
                    node_id: node_id.to_string(),
                });
            }
            if !graph.contains(node_id) {
                return Err(ArborError::node_not_found(node_id));
            }
            graph.remove_subtree(node_id, recursive, priority, &mut removed, &mut events);
        }

        // A node detached early may have been removed later in the walk
        events.retain(|e| !removed.iter().any(|r| r.as_ref() == e.node_id()));
        let mut seen = FxHashSet::default();
        events.retain(|e| seen.insert(e.node_id().to_string()));

        for id in &removed {
            self.interner.release(id);
            events.push(EventKind::NodeDeleted {
                node_id: id.clone(),
            });
        }
        debug!(count = removed.len(), "nodes removed");
        self.commit(events);
        Ok(removed)
    }

    /// Announce that a node changed
    pub fn modify(&self, node_id: &str, priority: Priority) -> Result<()> {
        let id = {
            let graph = self.read();
            graph
                .get(node_id)
                .map(|n| n.id.clone())
                .ok_or_else(|| ArborError::node_not_found(node_id))?
        };
        self.commit(vec![EventKind::NodeModified {
            node_id: id,
            priority,
        }]);
        Ok(())
    }

    /// Mutate the payload in place, then announce the change
    pub fn modify_with<R>(
        &self,
        node_id: &str,
        priority: Priority,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        let (id, result) = {
            let mut graph = self.state.write();
            let node = graph
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| ArborError::node_not_found(node_id))?;
            (node.id.clone(), f(&mut node.data))
        };
        self.commit(vec![EventKind::NodeModified {
            node_id: id,
            priority,
        }]);
        Ok(result)
    }

    /// Add one more parent (fan-in)
    ///
    /// Returns false if the relationship already existed. A missing parent
    /// makes the relationship pending.
    #[instrument(skip(self))]
    pub fn add_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();
            let node = graph
                .get(node_id)
                .ok_or_else(|| ArborError::node_not_found(node_id))?;
            if graph.is_root(parent_id) || node.parents.iter().any(|p| p.as_ref() == parent_id) {
                return Ok(false);
            }
            if !node.parents_allowed {
                return Err(ArborError::ParentsNotAllowed {
                    node_id: node_id.to_string(),
                });
            }
            let id = node.id.clone();

            if !graph.contains(parent_id) {
                if graph.pending.iter().any(|(p, c)| p.as_ref() == parent_id && *c == id) {
                    return Ok(false);
                }
                debug!("parent not present yet, relationship pending");
                graph.pending.push((NodeId::from(parent_id), id));
                return Ok(true);
            }

            graph.check_link(parent_id, node_id)?;
            graph.link(parent_id, node_id);
            let parent = graph
                .get(parent_id)
                .map_or_else(|| NodeId::from(parent_id), |p| p.id.clone());
            events.push(EventKind::NodeModified {
                node_id: parent,
                priority,
            });
            events.push(EventKind::NodeModified {
                node_id: id,
                priority,
            });
        }
        self.commit(events);
        Ok(true)
    }

    /// Replace every parent of `node_id` with `new_parent` (root when `None`)
    #[instrument(skip(self))]
    pub fn move_node(&self, node_id: &str, new_parent: Option<&str>) -> Result<()> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();
            let node = graph
                .get(node_id)
                .ok_or_else(|| ArborError::node_not_found(node_id))?;
            let id = node.id.clone();
            let old_parents = node.parents.clone();
            let target = new_parent.filter(|p| !graph.is_root(p));

            if let Some(pid) = target {
                if !node.parents_allowed {
                    return Err(ArborError::ParentsNotAllowed {
                        node_id: node_id.to_string(),
                    });
                }
                if pid == node_id {
                    return Err(ArborError::CycleDetected {
                        parent_id: pid.to_string(),
                        child_id: pid.to_string(),
                    });
                }
                if graph.contains(pid) {
                    graph.check_link(pid, node_id)?;
                    if old_parents.len() == 1 && old_parents[0].as_ref() == pid {
                        return Ok(());
                    }
                }
            } else if old_parents.is_empty() {
                graph.pending.retain(|(_, c)| *c != id);
                return Ok(());
            }

            for parent in &old_parents {
                if target == Some(parent.as_ref()) {
                    continue;
                }
                graph.unlink(parent, &id);
                events.push(EventKind::NodeModified {
                    node_id: parent.clone(),
                    priority,
                });
            }
            graph.pending.retain(|(_, c)| *c != id);

            match target {
                Some(pid) if graph.contains(pid) => {
                    if !old_parents.iter().any(|p| p.as_ref() == pid) {
                        graph.link(pid, &id);
                        let parent = graph
                            .get(pid)
                            .map_or_else(|| NodeId::from(pid), |p| p.id.clone());
                        events.push(EventKind::NodeModified {
                            node_id: parent,
                            priority,
                        });
                    }
                }
                Some(pid) => {
                    graph.pending.push((NodeId::from(pid), id.clone()));
                    graph.attach_to_root(&id);
                }
                None => graph.attach_to_root(&id),
            }
            events.push(EventKind::NodeModified {
                node_id: id,
                priority,
            });
        }
        self.commit(events);
        Ok(())
    }

    /// Break one relationship; a node left without parents returns to root
    ///
    /// Returns false if the relationship did not exist.
    #[instrument(skip(self))]
    pub fn remove_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();
            let id = graph
                .get(node_id)
                .map(|n| n.id.clone())
                .ok_or_else(|| ArborError::node_not_found(node_id))?;

            let pending_before = graph.pending.len();
            graph
                .pending
                .retain(|(p, c)| !(p.as_ref() == parent_id && *c == id));
            let dropped_pending = graph.pending.len() != pending_before;

            let Some(parent) = graph.get(parent_id).map(|p| p.id.clone()) else {
                return Ok(dropped_pending);
            };
            if !graph.unlink(&parent, &id) {
                return Ok(dropped_pending);
            }
            if graph.is_orphan(&id) {
                graph.attach_to_root(&id);
            }
            events.push(EventKind::NodeModified {
                node_id: parent,
                priority,
            });
            events.push(EventKind::NodeModified {
                node_id: id,
                priority,
            });
        }
        self.commit(events);
        Ok(true)
    }

    /// Allow or forbid children; forbidding detaches the current ones
    #[instrument(skip(self))]
    pub fn set_children_allowed(&self, node_id: &str, allowed: bool) -> Result<()> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();
            let node = graph
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| ArborError::node_not_found(node_id))?;
            if node.children_allowed == allowed {
                return Ok(());
            }
            node.children_allowed = allowed;
            let id = node.id.clone();
            let children = node.children.clone();

            if !allowed {
                for child in &children {
                    graph.unlink(&id, child);
                    if graph.is_orphan(child) {
                        graph.attach_to_root(child);
                    }
                    events.push(EventKind::NodeModified {
                        node_id: child.clone(),
                        priority,
                    });
                }
                graph.pending.retain(|(p, _)| *p != id);
            }
            events.push(EventKind::NodeModified {
                node_id: id,
                priority,
            });
        }
        self.commit(events);
        Ok(())
    }

    /// Allow or forbid parents; forbidding moves the node to root
    #[instrument(skip(self))]
    pub fn set_parents_allowed(&self, node_id: &str, allowed: bool) -> Result<()> {
        let priority = self.default_priority;
        let mut events = Vec::new();
        {
            let mut graph = self.state.write();
            let node = graph
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| ArborError::node_not_found(node_id))?;
            if node.parents_allowed == allowed {
                return Ok(());
            }
            node.parents_allowed = allowed;
            let id = node.id.clone();
            let parents = node.parents.clone();

            if !allowed {
                for parent in &parents {
                    graph.unlink(parent, &id);
                    events.push(EventKind::NodeModified {
                        node_id: parent.clone(),
                        priority,
                    });
                }
                graph.pending.retain(|(_, c)| *c != id);
                graph.attach_to_root(&id);
            }
            events.push(EventKind::NodeModified {
                node_id: id,
                priority,
            });
        }
        self.commit(events);
        Ok(())
    }

    /// Permute the children of `parent_id` (the root id reorders root nodes)
    ///
    /// `order` must contain exactly the current children.
    #[instrument(skip(self))]
    pub fn reorder_children(&self, parent_id: &str, order: &[&str]) -> Result<()> {
        let event = {
            let mut graph = self.state.write();
            if !graph.is_root(parent_id) && !graph.contains(parent_id) {
                return Err(ArborError::node_not_found(parent_id));
            }
            let current: Vec<NodeId> = graph.children_of(parent_id).to_vec();
            if order.len() != current.len() {
                return Err(ArborError::InvalidState {
                    reason: format!(
                        "reorder of '{}' expects {} children, got {}",
                        parent_id,
                        current.len(),
                        order.len()
                    ),
                });
            }

            let mut new_order = Vec::with_capacity(order.len());
            let mut used = vec![false; current.len()];
            for child_id in order {
                let index = current
                    .iter()
                    .position(|c| c.as_ref() == *child_id)
                    .filter(|i| !used[*i])
                    .ok_or_else(|| ArborError::InvalidState {
                        reason: format!(
                            "'{}' is not a child of '{}' or appears twice",
                            child_id, parent_id
                        ),
                    })?;
                used[index] = true;
                new_order.push(index);
            }
            if new_order.iter().enumerate().all(|(i, old)| i == *old) {
                return Ok(());
            }

            let reordered: Vec<NodeId> = new_order.iter().map(|i| current[*i].clone()).collect();
            let parent = if graph.is_root(parent_id) {
                // Root order is rank order, so ranks follow the new order
                for child in &reordered {
                    let rank = graph.next_rank();
                    if let Some(node) = graph.nodes.get_mut(child) {
                        node.rank = rank;
                    }
                }
                graph.root_children = reordered;
                graph.root_id.clone()
            } else {
                let node = graph
                    .nodes
                    .get_mut(parent_id)
                    .ok_or_else(|| ArborError::node_not_found(parent_id))?;
                node.children = reordered.into_iter().collect();
                node.id.clone()
            };

            EventKind::ChildrenReordered {
                node_id: parent,
                path: None,
                new_order,
            }
        };
        self.commit(vec![event]);
        Ok(())
    }

    /// Emit `node-modified` for every node, in insertion order
    pub fn refresh_all(&self) {
        let priority = self.default_priority;
        let events: Vec<EventKind> = self
            .read()
            .ids_by_rank()
            .into_iter()
            .map(|node_id| EventKind::NodeModified { node_id, priority })
            .collect();
        self.commit(events);
    }

    // ═══════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════

    pub fn has_node(&self, node_id: &str) -> bool {
        self.read().contains(node_id)
    }

    /// Borrow a node; the registry stays read-locked while the guard lives
    pub fn get_node(&self, node_id: &str) -> Result<MappedRwLockReadGuard<'_, Node<T>>> {
        RwLockReadGuard::try_map(self.read(), |graph| graph.nodes.get(node_id))
            .map_err(|_| ArborError::node_not_found(node_id))
    }

    /// Run `f` on a node together with its neighbourhood
    pub fn with_node<R>(&self, node_id: &str, f: impl FnOnce(NodeView<'_, T>) -> R) -> Result<R> {
        let graph = self.read();
        let view = graph
            .view(node_id)
            .ok_or_else(|| ArborError::node_not_found(node_id))?;
        Ok(f(view))
    }

    /// All node ids in insertion order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.read().ids_by_rank()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children of a node; the root id gives the parentless nodes
    pub fn children(&self, node_id: &str) -> Result<Vec<NodeId>> {
        let graph = self.read();
        if !graph.is_root(node_id) && !graph.contains(node_id) {
            return Err(ArborError::node_not_found(node_id));
        }
        Ok(graph.children_of(node_id).to_vec())
    }

    pub fn parents(&self, node_id: &str) -> Result<Vec<NodeId>> {
        let graph = self.read();
        graph
            .get(node_id)
            .map(|n| n.parents().to_vec())
            .ok_or_else(|| ArborError::node_not_found(node_id))
    }

    pub fn has_child(&self, node_id: &str, child_id: Option<&str>) -> bool {
        let graph = self.read();
        if graph.is_root(node_id) {
            return match child_id {
                Some(cid) => graph.root_children.iter().any(|c| c.as_ref() == cid),
                None => !graph.root_children.is_empty(),
            };
        }
        graph.get(node_id).is_some_and(|n| n.has_child(child_id))
    }

    pub fn node_has_parent(&self, node_id: &str, parent_id: Option<&str>) -> bool {
        self.read()
            .get(node_id)
            .is_some_and(|n| n.has_parent(parent_id))
    }

    /// Is `ancestor` reachable by walking up from `node_id`?
    pub fn is_ancestor(&self, ancestor: &str, node_id: &str) -> bool {
        ancestor != node_id && self.read().is_ancestor_or_self(ancestor, node_id)
    }

    /// Relationships waiting for a missing endpoint, as (parent, child)
    pub fn pending_relationships(&self) -> Vec<(NodeId, NodeId)> {
        self.read().pending.clone()
    }

    /// Every root-to-node path
    pub fn paths_for_node(&self, node_id: &str) -> Result<Vec<NodePath>> {
        let graph = self.read();
        if !graph.is_root(node_id) && !graph.contains(node_id) {
            return Err(ArborError::node_not_found(node_id));
        }
        Ok(graph.paths_for(node_id))
    }

    pub fn node_for_path(&self, path: &NodePath) -> Result<NodeId> {
        self.read()
            .resolve_path(path)
            .ok_or_else(|| ArborError::PathNotFound {
                path: path.to_string(),
            })
    }

    /// Next sibling under `parent_id` (first parent, or root, when `None`)
    pub fn next_node(&self, node_id: &str, parent_id: Option<&str>) -> Result<Option<NodeId>> {
        let graph = self.read();
        let node = graph
            .get(node_id)
            .ok_or_else(|| ArborError::node_not_found(node_id))?;
        let parent: &str = match parent_id {
            Some(pid) => pid,
            None => node
                .parents
                .first()
                .map_or(graph.root_id.as_ref(), |p| p.as_ref()),
        };
        let siblings = graph.children_of(parent);
        let index = siblings
            .iter()
            .position(|c| c.as_ref() == node_id)
            .ok_or_else(|| ArborError::InvalidState {
                reason: format!("'{}' is not a child of '{}'", node_id, parent),
            })?;
        Ok(siblings.get(index + 1).cloned())
    }

    pub fn nth_child(&self, node_id: &str, n: usize) -> Result<NodeId> {
        let graph = self.read();
        if !graph.is_root(node_id) && !graph.contains(node_id) {
            return Err(ArborError::node_not_found(node_id));
        }
        graph
            .children_of(node_id)
            .get(n)
            .cloned()
            .ok_or_else(|| ArborError::InvalidState {
                reason: format!("'{}' has no child at index {}", node_id, n),
            })
    }

    /// Number of children; recursive counts every occurrence below
    pub fn child_count(&self, node_id: &str, recursive: bool) -> Result<usize> {
        let graph = self.read();
        if !graph.is_root(node_id) && !graph.contains(node_id) {
            return Err(ArborError::node_not_found(node_id));
        }
        fn count<U>(graph: &GraphState<U>, node_id: &str, recursive: bool) -> usize {
            let children = graph.children_of(node_id);
            if !recursive {
                return children.len();
            }
            children
                .iter()
                .map(|c| 1 + count(graph, c, true))
                .sum()
        }
        Ok(count(&graph, node_id, recursive))
    }

    /// Indented rendering, one line per occurrence
    pub fn print_tree(&self) -> String {
        let graph = self.read();
        let mut out = String::new();
        let _ = writeln!(out, "{}", graph.root_id);
        let mut stack: Vec<(usize, &NodeId)> =
            graph.root_children.iter().rev().map(|c| (1, c)).collect();
        while let Some((depth, id)) = stack.pop() {
            let _ = writeln!(out, "{}{}", " ".repeat(depth), id);
            for child in graph.children_of(id).iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

impl<T> std::fmt::Debug for NodeRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("root_id", &self.root_id)
            .field("nodes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;

    fn registry() -> NodeRegistry<()> {
        NodeRegistry::new()
    }

    fn add(reg: &NodeRegistry<()>, id: &str, parent: Option<&str>) {
        reg.add(Node::new(id, ()), parent, Priority::Low).unwrap();
    }

    fn ids(list: Vec<NodeId>) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_under_root_and_parent() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "b", Some("a"));
        assert_eq!(ids(reg.children("root").unwrap()), vec!["a"]);
        assert_eq!(ids(reg.children("a").unwrap()), vec!["b"]);
        assert_eq!(ids(reg.parents("b").unwrap()), vec!["a"]);
    }

    #[test]
    fn duplicate_and_reserved_ids_are_rejected() {
        let reg = registry();
        add(&reg, "a", None);
        let dup = reg.add(Node::new("a", ()), None, Priority::Low).unwrap_err();
        assert_eq!(dup.code(), "ARBOR-002");
        let reserved = reg.add(Node::new("root", ()), None, Priority::Low).unwrap_err();
        assert_eq!(reserved.code(), "ARBOR-003");
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "b", Some("a"));
        add(&reg, "c", Some("b"));
        let err = reg.add_parent("a", "c").unwrap_err();
        assert!(matches!(err, ArborError::CycleDetected { .. }));
        assert!(reg.parents("a").unwrap().is_empty());
        assert!(!reg.has_child("c", None));
        assert!(reg.move_node("a", Some("c")).is_err());
    }

    #[test]
    fn pending_parent_is_resolved_on_arrival() {
        let reg = registry();
        let log = EventLog::new();
        reg.subscribe(Signal::NodeModified, log.clone());

        add(&reg, "child", Some("later"));
        assert_eq!(ids(reg.children("root").unwrap()), vec!["child"]);
        assert_eq!(reg.pending_relationships().len(), 1);

        add(&reg, "later", None);
        assert_eq!(ids(reg.children("later").unwrap()), vec!["child"]);
        assert_eq!(ids(reg.children("root").unwrap()), vec!["later"]);
        assert!(reg.pending_relationships().is_empty());
        assert_eq!(log.filter_node("child").len(), 1);
    }

    #[test]
    fn requested_parents_on_node() {
        let reg = registry();
        add(&reg, "p", None);
        reg.add(Node::new("c", ()).with_parent("p"), None, Priority::Low)
            .unwrap();
        assert!(reg.node_has_parent("c", Some("p")));
    }

    #[test]
    fn recursive_remove_keeps_shared_children() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "other", None);
        add(&reg, "b", Some("a"));
        add(&reg, "shared", Some("a"));
        reg.add_parent("shared", "other").unwrap();

        let removed = reg.remove("a", true).unwrap();
        assert_eq!(ids(removed), vec!["b", "a"]);
        assert!(reg.has_node("shared"));
        assert_eq!(ids(reg.parents("shared").unwrap()), vec!["other"]);
    }

    #[test]
    fn non_recursive_remove_reparents_to_root() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "b", Some("a"));
        reg.remove("a", false).unwrap();
        assert_eq!(ids(reg.children("root").unwrap()), vec!["b"]);
    }

    #[test]
    fn remove_emits_modified_then_deleted() {
        let reg = registry();
        let log = EventLog::new();
        add(&reg, "p", None);
        add(&reg, "a", Some("p"));
        add(&reg, "b", Some("a"));
        reg.bus().subscribe_all(log.clone());

        reg.remove("a", true).unwrap();
        let kinds = log.kinds();
        assert_eq!(kinds[0].signal(), Signal::NodeModified);
        assert_eq!(kinds[0].node_id(), "p");
        assert_eq!(kinds[1].node_id(), "b");
        assert_eq!(kinds[2].node_id(), "a");
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn move_replaces_all_parents() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "b", None);
        add(&reg, "c", Some("a"));
        reg.add_parent("c", "b").unwrap();
        reg.move_node("c", None).unwrap();
        assert!(reg.parents("c").unwrap().is_empty());
        assert_eq!(ids(reg.children("root").unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn capability_flags() {
        let reg = registry();
        reg.add(Node::leaf("leaf", ()), None, Priority::Low).unwrap();
        add(&reg, "x", None);
        let err = reg.add_parent("x", "leaf").unwrap_err();
        assert_eq!(err.code(), "ARBOR-011");

        add(&reg, "y", Some("x"));
        reg.set_children_allowed("x", false).unwrap();
        assert!(reg.parents("y").unwrap().is_empty());
        assert!(reg.has_child("root", Some("y")));
    }

    #[test]
    fn rejected_parent_fails_the_whole_add() {
        let reg = registry();
        let log = EventLog::new();
        reg.add(Node::leaf("leaf", ()), None, Priority::Low).unwrap();
        add(&reg, "p", None);
        reg.subscribe(Signal::NodeAdded, log.clone());

        let node = Node::new("n", ()).with_parent("p").with_parent("leaf");
        let err = reg.add(node, None, Priority::Low).unwrap_err();
        assert_eq!(err.code(), "ARBOR-011");
        assert!(!reg.has_node("n"));
        assert!(reg.children("p").unwrap().is_empty());

        let node = Node::new("orphan", ()).with_parents_allowed(false);
        let err = reg.add(node, Some("p"), Priority::Low).unwrap_err();
        assert_eq!(err.code(), "ARBOR-012");
        assert!(log.is_empty());
    }

    #[test]
    fn cycle_through_adopted_child_fails_add() {
        let reg = registry();
        add(&reg, "kid", Some("ghost"));
        let err = reg
            .add(Node::new("ghost", ()), Some("kid"), Priority::Low)
            .unwrap_err();
        assert_eq!(err.code(), "ARBOR-010");
        assert!(!reg.has_node("ghost"));
        assert_eq!(reg.pending_relationships().len(), 1);
    }

    #[test]
    fn reorder_children_reports_permutation() {
        let reg = registry();
        let log = EventLog::new();
        add(&reg, "p", None);
        for id in ["a", "b", "c"] {
            add(&reg, id, Some("p"));
        }
        reg.subscribe(Signal::NodeChildrenReordered, log.clone());
        reg.reorder_children("p", &["c", "a", "b"]).unwrap();
        assert_eq!(ids(reg.children("p").unwrap()), vec!["c", "a", "b"]);
        match &log.kinds()[0] {
            EventKind::ChildrenReordered { new_order, .. } => assert_eq!(new_order, &vec![2, 0, 1]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(reg.reorder_children("p", &["a", "a", "b"]).is_err());
    }

    #[test]
    fn paths_and_navigation() {
        let reg = registry();
        add(&reg, "a", None);
        add(&reg, "b", None);
        add(&reg, "c", Some("a"));
        reg.add_parent("c", "b").unwrap();
        let paths = reg.paths_for_node("c").unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(reg.node_for_path(&paths[1]).unwrap().as_ref(), "c");
        assert!(reg.node_for_path(&["a", "b"].into_iter().collect()).is_err());
        assert_eq!(reg.next_node("a", None).unwrap().as_deref(), Some("b"));
        assert_eq!(reg.child_count("root", true).unwrap(), 4);
        assert_eq!(reg.print_tree(), "root\n a\n  c\n b\n  c\n");
    }

    #[test]
    fn modify_with_changes_payload() {
        let reg: NodeRegistry<u32> = NodeRegistry::new();
        reg.add(Node::new("n", 1), None, Priority::Low).unwrap();
        let old = reg
            .modify_with("n", Priority::High, |v| std::mem::replace(v, 5))
            .unwrap();
        assert_eq!(old, 1);
        assert_eq!(*reg.get_node("n").unwrap().data(), 5);
    }
}
