//! Node types: the canonical node record, a read-only view of it, priorities
//!
//! The registry owns every `Node<T>`. Everything else refers to nodes by id
//! and borrows a `NodeView` when it needs to look at one.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::registry::GraphState;
use super::{AdjVec, NodeId};

/// Ordering hint for pending notification processing
///
/// Carried on raw events so an external request queue can coalesce them.
/// Never affects graph structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// A node of the graph with an application payload
///
/// Parent and child lists are maintained by the registry; a node never
/// edits them itself.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub(crate) id: NodeId,
    pub(crate) parents: AdjVec,
    pub(crate) children: AdjVec,
    pub(crate) children_allowed: bool,
    pub(crate) parents_allowed: bool,
    /// Relationships requested before the node joined a registry
    pub(crate) requested_parents: Vec<NodeId>,
    /// Position key among root children; assigned by the registry
    pub(crate) rank: u64,
    pub(crate) data: T,
}

impl<T> Node<T> {
    pub fn new(id: impl AsRef<str>, data: T) -> Self {
        Self {
            id: NodeId::from(id.as_ref()),
            parents: AdjVec::new(),
            children: AdjVec::new(),
            children_allowed: true,
            parents_allowed: true,
            requested_parents: Vec::new(),
            rank: 0,
            data,
        }
    }

    /// A node that can never have children
    pub fn leaf(id: impl AsRef<str>, data: T) -> Self {
        Self::new(id, data).with_children_allowed(false)
    }

    pub fn with_children_allowed(mut self, allowed: bool) -> Self {
        self.children_allowed = allowed;
        self
    }

    pub fn with_parents_allowed(mut self, allowed: bool) -> Self {
        self.parents_allowed = allowed;
        self
    }

    /// Request a parent before the node is added
    ///
    /// If the parent is not in the registry yet, the relationship is kept
    /// pending and created when the parent arrives.
    pub fn with_parent(mut self, parent_id: impl AsRef<str>) -> Self {
        let parent_id = NodeId::from(parent_id.as_ref());
        if parent_id != self.id && !self.requested_parents.contains(&parent_id) {
            self.requested_parents.push(parent_id);
        }
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Parent ids in the order they were attached
    pub fn parents(&self) -> &[NodeId] {
        if self.parents_allowed {
            &self.parents
        } else {
            &[]
        }
    }

    /// Child ids in registry order
    pub fn children(&self) -> &[NodeId] {
        if self.children_allowed {
            &self.children
        } else {
            &[]
        }
    }

    pub fn has_parent(&self, parent_id: Option<&str>) -> bool {
        match parent_id {
            Some(pid) => self.parents().iter().any(|p| p.as_ref() == pid),
            None => !self.parents().is_empty(),
        }
    }

    pub fn has_child(&self, child_id: Option<&str>) -> bool {
        match child_id {
            Some(cid) => self.children().iter().any(|c| c.as_ref() == cid),
            None => !self.children().is_empty(),
        }
    }

    pub fn child_index(&self, child_id: &str) -> Option<usize> {
        self.children().iter().position(|c| c.as_ref() == child_id)
    }

    pub fn children_allowed(&self) -> bool {
        self.children_allowed
    }

    pub fn parents_allowed(&self) -> bool {
        self.parents_allowed
    }
}

/// Read-only access to a node together with the graph that owns it
///
/// Filter predicates and comparators receive this, so a predicate can look
/// at neighbours (e.g. "has no green child") without touching the registry
/// lock again.
pub struct NodeView<'a, T> {
    node: &'a Node<T>,
    graph: &'a GraphState<T>,
}

impl<T> Clone for NodeView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeView<'_, T> {}

impl<'a, T> NodeView<'a, T> {
    pub(crate) fn new(node: &'a Node<T>, graph: &'a GraphState<T>) -> Self {
        Self { node, graph }
    }

    pub fn id(&self) -> &'a str {
        &self.node.id
    }

    pub fn data(&self) -> &'a T {
        &self.node.data
    }

    pub fn node(&self) -> &'a Node<T> {
        self.node
    }

    pub fn parent_ids(&self) -> &'a [NodeId] {
        self.node.parents()
    }

    pub fn child_ids(&self) -> &'a [NodeId] {
        self.node.children()
    }

    pub fn has_child(&self) -> bool {
        self.node.has_child(None)
    }

    pub fn has_parent(&self) -> bool {
        self.node.has_parent(None)
    }

    /// Children that are present in the graph
    pub fn children(&self) -> impl Iterator<Item = NodeView<'a, T>> + 'a {
        let graph = self.graph;
        self.node
            .children()
            .iter()
            .filter_map(move |id| graph.view(id))
    }

    pub fn parents(&self) -> impl Iterator<Item = NodeView<'a, T>> + 'a {
        let graph = self.graph;
        self.node
            .parents()
            .iter()
            .filter_map(move |id| graph.view(id))
    }

    /// Look up any other node of the same graph
    pub fn lookup(&self, node_id: &str) -> Option<NodeView<'a, T>> {
        self.graph.view(node_id)
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.node.id)
            .field("data", &self.node.data)
            .finish()
    }
}
