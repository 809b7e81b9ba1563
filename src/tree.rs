//! Arbor - one graph, its filters, and the views built on them

use parking_lot::{MappedRwLockReadGuard, Mutex};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::ArborConfig;
use crate::error::Result;
use crate::event::{EventSink, Signal, SubscriptionId};
use crate::filter::{FilterBank, FilterParams};
use crate::graph::{Node, NodeId, NodeRegistry, NodeView, Priority};
use crate::view::{FilteredProjection, ViewCount, ViewHandle};

/// Facade owning a registry, its filter bank and its named views
pub struct Arbor<T> {
    config: ArborConfig,
    registry: NodeRegistry<T>,
    bank: FilterBank<T>,
    views: Mutex<FxHashMap<String, FilteredProjection<T>>>,
    counts: Mutex<FxHashMap<String, ViewCount<T>>>,
}

impl<T: Send + Sync + 'static> Default for Arbor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Arbor<T> {
    pub fn new() -> Self {
        Self::with_config(ArborConfig::default())
    }

    pub fn with_config(config: ArborConfig) -> Self {
        let registry = NodeRegistry::with_config(&config);
        let bank = FilterBank::new(registry.clone(), config.isolate_panics);
        Self {
            config,
            registry,
            bank,
            views: Mutex::new(FxHashMap::default()),
            counts: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry<T> {
        &self.registry
    }

    pub fn filters(&self) -> &FilterBank<T> {
        &self.bank
    }

    pub fn subscribe(&self, signal: Signal, sink: impl EventSink + 'static) -> SubscriptionId {
        self.registry.subscribe(signal, sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    // ═══════════════════════════════════════════
    // NODES
    // ═══════════════════════════════════════════

    pub fn add_node(&self, node: Node<T>, parent_id: Option<&str>, priority: Priority) -> Result<()> {
        self.registry.add(node, parent_id, priority)
    }

    /// Returns the removed ids, deepest first
    pub fn remove_node(&self, node_id: &str, recursive: bool) -> Result<Vec<NodeId>> {
        self.registry.remove(node_id, recursive)
    }

    pub fn modify_node(&self, node_id: &str, priority: Priority) -> Result<()> {
        self.registry.modify(node_id, priority)
    }

    pub fn modify_node_with(&self, node_id: &str, f: impl FnOnce(&mut T)) -> Result<()> {
        self.registry
            .modify_with(node_id, self.config.default_priority, f)
    }

    pub fn add_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        self.registry.add_parent(node_id, parent_id)
    }

    pub fn move_node(&self, node_id: &str, new_parent: Option<&str>) -> Result<()> {
        self.registry.move_node(node_id, new_parent)
    }

    pub fn remove_parent(&self, node_id: &str, parent_id: &str) -> Result<bool> {
        self.registry.remove_parent(node_id, parent_id)
    }

    pub fn reorder_children(&self, parent_id: &str, order: &[&str]) -> Result<()> {
        self.registry.reorder_children(parent_id, order)
    }

    pub fn refresh_all(&self) {
        self.registry.refresh_all()
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.registry.has_node(node_id)
    }

    pub fn get_node(&self, node_id: &str) -> Result<MappedRwLockReadGuard<'_, Node<T>>> {
        self.registry.get_node(node_id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // ═══════════════════════════════════════════
    // FILTERS
    // ═══════════════════════════════════════════

    pub fn register_filter<F>(&self, name: &str, predicate: F, params: Option<FilterParams>) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>, &FilterParams) -> bool + Send + Sync + 'static,
    {
        self.bank.register(name, predicate, params)
    }

    pub fn register_filter_fn<F>(&self, name: &str, predicate: F) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>) -> bool + Send + Sync + 'static,
    {
        self.bank.register_fn(name, predicate)
    }

    pub fn unregister_filter(&self, name: &str) -> bool {
        self.bank.unregister(name)
    }

    pub fn list_filters(&self) -> Vec<String> {
        self.bank.list_filters()
    }

    // ═══════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════

    /// The unfiltered view of the whole graph
    pub fn main_view(&self) -> ViewHandle<T> {
        ViewHandle::new_static(self.registry.clone(), self.bank.clone())
    }

    /// A filtered view
    ///
    /// A named view is created on first use and shared afterwards (`refresh`
    /// only matters on creation). `None` always creates a fresh view.
    pub fn view(&self, name: Option<&str>, refresh: bool) -> ViewHandle<T> {
        let projection = match name {
            Some(name) => {
                let mut views = self.views.lock();
                views
                    .entry(name.to_string())
                    .or_insert_with(|| {
                        debug!(view = name, "creating named view");
                        self.projection(Some(name.to_string()), refresh)
                    })
                    .clone()
            }
            None => self.projection(None, refresh),
        };
        ViewHandle::new_filtered(self.registry.clone(), self.bank.clone(), projection)
    }

    /// Named view, loaded on creation when `refresh_new_views` is set
    pub fn open_view(&self, name: &str) -> ViewHandle<T> {
        self.view(Some(name), self.config.refresh_new_views)
    }

    /// Forget a named view; returns false if there was none
    pub fn close_view(&self, name: &str) -> bool {
        self.views.lock().remove(name).is_some()
    }

    pub fn view_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.views.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// A live counter; named counters are shared like named views
    pub fn view_count(&self, name: Option<&str>, refresh: bool) -> ViewCount<T> {
        let create = |name: Option<String>| {
            ViewCount::new(
                self.registry.clone(),
                self.bank.clone(),
                name,
                refresh,
                self.config.isolate_panics,
            )
        };
        match name {
            Some(name) => self
                .counts
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| create(Some(name.to_string())))
                .clone(),
            None => create(None),
        }
    }

    fn projection(&self, name: Option<String>, refresh: bool) -> FilteredProjection<T> {
        FilteredProjection::new(
            self.registry.clone(),
            self.bank.clone(),
            name,
            refresh,
            self.config.isolate_panics,
        )
    }
}

impl<T> std::fmt::Debug for Arbor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbor")
            .field("registry", &self.registry)
            .field("views", &self.views.lock().len())
            .finish()
    }
}
