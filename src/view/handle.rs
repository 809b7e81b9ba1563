//! ViewHandle - one consumer-facing surface over two kinds of view
//!
//! `Static` mirrors the registry (no filters), `Filtered` wraps a
//! `FilteredProjection`. Structural edits always go to the registry.

use std::cmp::Ordering;

use parking_lot::MappedRwLockReadGuard;

use crate::error::{ArborError, Result};
use crate::event::{EventSink, Signal, SubscriptionId};
use crate::filter::{FilterBank, FilterParams};
use crate::graph::{Node, NodeId, NodePath, NodeRegistry, NodeView};

use super::FilteredProjection;

pub enum ViewMode<T> {
    /// Unfiltered view of the whole registry
    Static,
    Filtered(FilteredProjection<T>),
}

impl<T> Clone for ViewMode<T> {
    fn clone(&self) -> Self {
        match self {
            ViewMode::Static => ViewMode::Static,
            ViewMode::Filtered(p) => ViewMode::Filtered(p.clone()),
        }
    }
}

pub struct ViewHandle<T> {
    registry: NodeRegistry<T>,
    bank: FilterBank<T>,
    mode: ViewMode<T>,
}

impl<T> Clone for ViewHandle<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            bank: self.bank.clone(),
            mode: self.mode.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ViewHandle<T> {
    pub fn new_static(registry: NodeRegistry<T>, bank: FilterBank<T>) -> Self {
        Self {
            registry,
            bank,
            mode: ViewMode::Static,
        }
    }

    pub fn new_filtered(
        registry: NodeRegistry<T>,
        bank: FilterBank<T>,
        projection: FilteredProjection<T>,
    ) -> Self {
        Self {
            registry,
            bank,
            mode: ViewMode::Filtered(projection),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.mode, ViewMode::Static)
    }

    pub fn mode(&self) -> &ViewMode<T> {
        &self.mode
    }

    pub fn projection(&self) -> Option<&FilteredProjection<T>> {
        match &self.mode {
            ViewMode::Static => None,
            ViewMode::Filtered(p) => Some(p),
        }
    }

    fn root(&self) -> &str {
        self.registry.root_id()
    }

    fn filtered(&self, operation: &str) -> Result<&FilteredProjection<T>> {
        self.projection()
            .ok_or_else(|| ArborError::unsupported(format!("{} on a static view", operation)))
    }

    // ═══════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════

    /// Static views deliver registry events; filtered views deliver both
    /// registry events and their own `*-inview` events
    pub fn subscribe(&self, signal: Signal, sink: impl EventSink + 'static) -> SubscriptionId {
        match &self.mode {
            ViewMode::Static => self.registry.subscribe(signal, sink),
            ViewMode::Filtered(p) => p.subscribe(signal, sink),
        }
    }

    pub fn subscribe_all(&self, sink: impl EventSink + 'static) -> SubscriptionId {
        match &self.mode {
            ViewMode::Static => self.registry.subscribe_all(sink),
            ViewMode::Filtered(p) => p.subscribe_all(sink),
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match &self.mode {
            ViewMode::Static => self.registry.unsubscribe(id),
            ViewMode::Filtered(p) => p.unsubscribe(id),
        }
    }

    // ═══════════════════════════════════════════
    // FILTERS (filtered views only)
    // ═══════════════════════════════════════════

    pub fn apply_filter(
        &self,
        name: &str,
        params: Option<FilterParams>,
        reset: bool,
        refresh: bool,
    ) -> Result<bool> {
        self.filtered("apply_filter")?
            .apply_filter(name, params, reset, refresh)
    }

    pub fn unapply_filter(&self, name: &str, refresh: bool) -> Result<bool> {
        Ok(self.filtered("unapply_filter")?.unapply_filter(name, refresh))
    }

    pub fn reset_filters(&self, refresh: bool, transparent_only: bool) -> Result<()> {
        self.filtered("reset_filters")?
            .reset_filters(refresh, transparent_only);
        Ok(())
    }

    pub fn refilter(&self) -> Result<()> {
        self.filtered("refilter")?.refresh();
        Ok(())
    }

    pub fn list_applied_filters(&self) -> Vec<String> {
        self.projection()
            .map(|p| p.list_applied_filters())
            .unwrap_or_default()
    }

    pub fn set_comparator<F>(&self, cmp: F) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>, &NodeView<'_, T>) -> Ordering + Send + Sync + 'static,
    {
        self.filtered("set_comparator")?.set_comparator(cmp);
        Ok(())
    }

    pub fn queue_action(&self, node_id: &str, action: impl FnOnce(&str) + Send + 'static) -> Result<()> {
        self.filtered("queue_action")?.queue_action(node_id, action);
        Ok(())
    }

    // ═══════════════════════════════════════════
    // NODE ACCESS (always the registry)
    // ═══════════════════════════════════════════

    pub fn has_node(&self, node_id: &str) -> bool {
        self.registry.has_node(node_id)
    }

    pub fn get_node(&self, node_id: &str) -> Result<MappedRwLockReadGuard<'_, Node<T>>> {
        self.registry.get_node(node_id)
    }

    pub fn with_node<R>(&self, node_id: &str, f: impl FnOnce(NodeView<'_, T>) -> R) -> Result<R> {
        self.registry.with_node(node_id, f)
    }

    // ═══════════════════════════════════════════
    // STRUCTURE
    // ═══════════════════════════════════════════

    pub fn is_displayed(&self, node_id: &str) -> bool {
        match &self.mode {
            ViewMode::Static => self.registry.has_node(node_id),
            ViewMode::Filtered(p) => p.is_displayed(node_id),
        }
    }

    pub fn all_nodes(&self) -> Vec<NodeId> {
        match &self.mode {
            ViewMode::Static => self.registry.node_ids(),
            ViewMode::Filtered(p) => p.all_nodes(),
        }
    }

    /// Every occurrence path; empty when the node is not in this view
    pub fn paths_for_node(&self, node_id: &str) -> Vec<NodePath> {
        match &self.mode {
            ViewMode::Static => self.registry.paths_for_node(node_id).unwrap_or_default(),
            ViewMode::Filtered(p) => p.paths_for_node(node_id),
        }
    }

    pub fn node_for_path(&self, path: &NodePath) -> Result<NodeId> {
        match &self.mode {
            ViewMode::Static => self.registry.node_for_path(path),
            ViewMode::Filtered(p) => p.node_for_path(path),
        }
    }

    /// `None` is the view root
    pub fn node_children(&self, node_id: Option<&str>) -> Result<Vec<NodeId>> {
        match &self.mode {
            ViewMode::Static => self
                .registry
                .children(node_id.unwrap_or(self.root())),
            ViewMode::Filtered(p) => p.node_children(node_id),
        }
    }

    pub fn node_parents(&self, node_id: &str) -> Result<Vec<NodeId>> {
        match &self.mode {
            ViewMode::Static => self.registry.parents(node_id),
            ViewMode::Filtered(p) => p.node_parents(node_id),
        }
    }

    pub fn child_count(&self, node_id: Option<&str>, recursive: bool) -> usize {
        match &self.mode {
            ViewMode::Static => self
                .registry
                .child_count(node_id.unwrap_or(self.root()), recursive)
                .unwrap_or(0),
            ViewMode::Filtered(p) => p.child_count(node_id, recursive),
        }
    }

    pub fn nth_child(&self, node_id: Option<&str>, n: usize) -> Result<NodeId> {
        match &self.mode {
            ViewMode::Static => self
                .registry
                .nth_child(node_id.unwrap_or(self.root()), n),
            ViewMode::Filtered(p) => p.nth_child(node_id, n),
        }
    }

    pub fn has_child(&self, node_id: &str) -> bool {
        match &self.mode {
            ViewMode::Static => self.registry.has_child(node_id, None),
            ViewMode::Filtered(p) => p.has_child(node_id),
        }
    }

    pub fn next_node(&self, node_id: &str, parent_id: Option<&str>) -> Result<Option<NodeId>> {
        match &self.mode {
            ViewMode::Static => self.registry.next_node(node_id, parent_id),
            ViewMode::Filtered(p) => p.next_node(node_id, parent_id),
        }
    }

    /// Nodes in this view that also pass `with_filters`
    pub fn count_nodes(&self, with_filters: &[&str], include_transparent: bool) -> usize {
        match &self.mode {
            ViewMode::Static => self
                .registry
                .node_ids()
                .iter()
                .filter(|id| {
                    with_filters
                        .iter()
                        .filter(|name| self.bank.has_filter(name))
                        .all(|name| self.bank.evaluate(name, id).unwrap_or(false))
                })
                .count(),
            ViewMode::Filtered(p) => p.count_nodes(with_filters, include_transparent),
        }
    }

    /// Replay the current content to subscribers
    ///
    /// Filtered views emit `node-added-inview` per occurrence; static views
    /// re-announce every node as modified.
    pub fn emit_current_state(&self) {
        match &self.mode {
            ViewMode::Static => self.registry.refresh_all(),
            ViewMode::Filtered(p) => p.emit_current_state(),
        }
    }

    pub fn print_tree(&self) -> String {
        match &self.mode {
            ViewMode::Static => self.registry.print_tree(),
            ViewMode::Filtered(p) => p.print_tree(),
        }
    }

    // ═══════════════════════════════════════════
    // EDITS (forwarded to the registry)
    // ═══════════════════════════════════════════

    pub fn move_node(&self, node_id: &str, new_parent: Option<&str>) -> Result<()> {
        self.registry.move_node(node_id, new_parent)
    }

    pub fn add_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        self.registry.add_parent(node_id, parent_id)
    }

    pub fn remove_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        self.registry.remove_parent(node_id, parent_id)
    }
}

impl<T> std::fmt::Debug for ViewHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mode {
            ViewMode::Static => f.write_str("ViewHandle(static)"),
            ViewMode::Filtered(p) => f.debug_tuple("ViewHandle").field(p).finish(),
        }
    }
}
