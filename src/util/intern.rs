//! String interning for node ids
//!
//! Each unique id string is stored once per registry. The interner is owned
//! by the registry that uses it, so two graphs never share id storage.
//!
//! - Memory: single allocation per unique id
//! - Cloning: Arc::clone is O(1), no string copy

use std::sync::Arc;

use dashmap::DashMap;

/// Thread-safe string interner using DashMap
#[derive(Debug, Default)]
pub struct Interner {
    /// Map from string content to interned Arc<str>
    strings: DashMap<Arc<str>, ()>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a shared Arc<str>
    ///
    /// If the string was already interned, returns the existing Arc.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing.key());
        }

        let key: Arc<str> = Arc::from(s);
        // entry() resolves a race with a concurrent insert of the same id
        let entry = self.strings.entry(Arc::clone(&key)).or_insert(());
        Arc::clone(entry.key())
    }

    /// Drop an id that is no longer referenced by the graph
    pub fn release(&self, s: &str) {
        self.strings.remove(s);
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
