//! Per-execution typed registry.
//!
//! A mutable key-value store scoped to one execution, keyed by type. Used
//! for cross-segment state such as timers or request identifiers, and
//! released when the execution completes.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

pub(crate) struct Registry {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type.
    pub(crate) fn insert<V: Send + Sync + 'static>(&self, value: V) {
        self.entries.insert(TypeId::of::<V>(), Arc::new(value));
    }

    /// Look up a value by type.
    pub(crate) fn get<V: Send + Sync + 'static>(&self) -> Option<Arc<V>> {
        self.entries
            .get(&TypeId::of::<V>())
            .and_then(|entry| entry.value().clone().downcast::<V>().ok())
    }

    /// Release all entries.
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}
