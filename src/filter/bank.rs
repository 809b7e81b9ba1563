//! FilterBank - named predicates shared by every view of a graph
//!
//! A filter is a predicate over a node plus default parameters. Views
//! reference filters by name and may bind their own parameters; the bank's
//! defaults are never changed by a view.
//!
//! Reserved parameter keys:
//! - `negate`: invert the predicate result
//! - `flat`: a view applying this filter shows every node directly under its root
//! - `transparent`: ignored by `count_nodes(.., include_transparent = false)`

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ArborError, Result};
use crate::graph::{NodeRegistry, NodeView};

pub const NEGATE: &str = "negate";
pub const FLAT: &str = "flat";
pub const TRANSPARENT: &str = "transparent";

/// Prefix that turns a filter name into its negated alias
pub const NEGATION_PREFIX: char = '!';

/// Parameters bound to a filter (JSON object)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterParams(Map<String, Value>);

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean parameter; absent or non-boolean is false
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of `self` with `overrides` applied on top
    pub fn merged(&self, overrides: &FilterParams) -> FilterParams {
        let mut merged = self.0.clone();
        for (key, value) in &overrides.0 {
            merged.insert(key.clone(), value.clone());
        }
        FilterParams(merged)
    }
}

impl From<Map<String, Value>> for FilterParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Predicate signature: the node (with its graph neighbourhood) and the
/// effective parameters
pub type Predicate<T> = Arc<dyn Fn(&NodeView<'_, T>, &FilterParams) -> bool + Send + Sync>;

/// A registered filter
pub struct Filter<T> {
    name: String,
    predicate: Predicate<T>,
    params: FilterParams,
}

impl<T> Filter<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default parameters registered with the filter
    pub fn params(&self) -> &FilterParams {
        &self.params
    }
}

impl<T> std::fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// A filter resolved by name, possibly through its `!name` alias
pub struct FilterRef<T> {
    filter: Arc<Filter<T>>,
    negated: bool,
    isolate_panics: bool,
}

impl<T> Clone for FilterRef<T> {
    fn clone(&self) -> Self {
        Self {
            filter: Arc::clone(&self.filter),
            negated: self.negated,
            isolate_panics: self.isolate_panics,
        }
    }
}

impl<T> FilterRef<T> {
    pub fn name(&self) -> &str {
        &self.filter.name
    }

    /// Bank defaults with the view's parameters on top
    pub fn effective_params(&self, overrides: Option<&FilterParams>) -> FilterParams {
        match overrides {
            Some(overrides) => self.filter.params.merged(overrides),
            None => self.filter.params.clone(),
        }
    }

    pub fn is_flat(&self, overrides: Option<&FilterParams>) -> bool {
        self.flag(FLAT, overrides)
    }

    pub fn is_transparent(&self, overrides: Option<&FilterParams>) -> bool {
        self.flag(TRANSPARENT, overrides)
    }

    fn flag(&self, key: &str, overrides: Option<&FilterParams>) -> bool {
        overrides
            .and_then(|o| o.get(key))
            .or_else(|| self.filter.params.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Evaluate against a node; a panicking predicate hides the node
    pub fn matches(&self, node: &NodeView<'_, T>, overrides: Option<&FilterParams>) -> bool {
        let params = self.effective_params(overrides);
        let call = || (self.filter.predicate)(node, &params);

        let value = if self.isolate_panics {
            match catch_unwind(AssertUnwindSafe(call)) {
                Ok(value) => value,
                Err(_) => {
                    warn!(filter = %self.filter.name, node_id = node.id(), "filter predicate panicked, hiding node");
                    return false;
                }
            }
        } else {
            call()
        };

        value != (params.flag(NEGATE) != self.negated)
    }
}

struct BankState<T> {
    filters: FxHashMap<String, Arc<Filter<T>>>,
    /// Registration order, for listing
    order: Vec<String>,
    /// Built-ins that cannot be unregistered
    protected: FxHashSet<String>,
}

/// Named filter registry bound to one graph
///
/// Cheap to clone: clones share the same filters.
pub struct FilterBank<T> {
    state: Arc<RwLock<BankState<T>>>,
    registry: NodeRegistry<T>,
    isolate_panics: bool,
}

impl<T> Clone for FilterBank<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            registry: self.registry.clone(),
            isolate_panics: self.isolate_panics,
        }
    }
}

impl<T: 'static> FilterBank<T> {
    pub fn new(registry: NodeRegistry<T>, isolate_panics: bool) -> Self {
        Self {
            state: Arc::new(RwLock::new(BankState {
                filters: FxHashMap::default(),
                order: Vec::new(),
                protected: FxHashSet::default(),
            })),
            registry,
            isolate_panics,
        }
    }

    /// Register a parameterised predicate
    ///
    /// `!name` is sugar for the negation of an existing `name`: registering
    /// it succeeds without storing anything.
    pub fn register<F>(&self, name: &str, predicate: F, params: Option<FilterParams>) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>, &FilterParams) -> bool + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(predicate), params, false)
    }

    /// Register a predicate that only looks at the node
    pub fn register_fn<F>(&self, name: &str, predicate: F) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>) -> bool + Send + Sync + 'static,
    {
        self.insert(
            name,
            Arc::new(move |node: &NodeView<'_, T>, _: &FilterParams| predicate(node)),
            None,
            false,
        )
    }

    /// Register a filter that `unregister` refuses to remove
    pub fn register_builtin<F>(
        &self,
        name: &str,
        predicate: F,
        params: Option<FilterParams>,
    ) -> Result<()>
    where
        F: Fn(&NodeView<'_, T>, &FilterParams) -> bool + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(predicate), params, true)
    }

    fn insert(
        &self,
        name: &str,
        predicate: Predicate<T>,
        params: Option<FilterParams>,
        protected: bool,
    ) -> Result<()> {
        let mut state = self.state.write();

        if let Some(base) = name.strip_prefix(NEGATION_PREFIX) {
            if state.filters.contains_key(base) {
                debug!(filter = base, "negated alias registered");
                return Ok(());
            }
            return Err(ArborError::filter_not_found(base));
        }
        if state.filters.contains_key(name) {
            return Err(ArborError::FilterExists {
                name: name.to_string(),
            });
        }

        state.filters.insert(
            name.to_string(),
            Arc::new(Filter {
                name: name.to_string(),
                predicate,
                params: params.unwrap_or_default(),
            }),
        );
        state.order.push(name.to_string());
        if protected {
            state.protected.insert(name.to_string());
        }
        debug!(filter = name, "filter registered");
        Ok(())
    }

    /// Returns false for unknown or built-in filters
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.write();
        if state.protected.contains(name) {
            warn!(filter = name, "refusing to unregister built-in filter");
            return false;
        }
        if state.filters.remove(name).is_none() {
            return false;
        }
        state.order.retain(|n| n != name);
        true
    }

    /// Resolve a name, following the `!name` alias
    pub fn get(&self, name: &str) -> Option<FilterRef<T>> {
        let (base, negated) = match name.strip_prefix(NEGATION_PREFIX) {
            Some(base) => (base, true),
            None => (name, false),
        };
        self.state.read().filters.get(base).map(|filter| FilterRef {
            filter: Arc::clone(filter),
            negated,
            isolate_panics: self.isolate_panics,
        })
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in registration order
    pub fn list_filters(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Evaluate a filter with its default parameters
    ///
    /// A node that is gone evaluates to false rather than failing, so a
    /// deletion racing an evaluation resolves to "not displayed".
    pub fn evaluate(&self, name: &str, node_id: &str) -> Result<bool> {
        let filter = self
            .get(name)
            .ok_or_else(|| ArborError::filter_not_found(name))?;
        let graph = self.registry.read();
        Ok(graph
            .view(node_id)
            .is_some_and(|node| filter.matches(&node, None)))
    }
}

impl<T: 'static> std::fmt::Debug for FilterBank<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterBank")
            .field("filters", &self.list_filters())
            .finish()
    }
}
