//! Thread-safe extension bags with parent fallback.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

/// A type-keyed extension store.
///
/// Values are stored either by their type or under a string key. Lookups
/// check the local map first, then delegate to the parent bag. Writes always
/// go to the local map and shadow any parent value.
#[derive(Default)]
pub struct ContextBag {
    typed: RwLock<HashMap<TypeId, Entry>>,
    named: RwLock<HashMap<String, Entry>>,
    parent: Option<Arc<ContextBag>>,
}

impl ContextBag {
    /// Creates a new root bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag that falls back to `parent` for missing entries.
    #[must_use]
    pub fn with_parent(parent: Arc<ContextBag>) -> Self {
        Self {
            typed: RwLock::new(HashMap::new()),
            named: RwLock::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    /// Returns the parent bag, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<ContextBag>> {
        self.parent.as_ref()
    }

    /// Stores a value keyed by its type.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        self.typed.write().insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Stores an already shared value keyed by its type.
    pub fn set_arc<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.typed.write().insert(TypeId::of::<T>(), value);
    }

    /// Gets a value by type, falling back to the parent chain.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let local = self.typed.read().get(&TypeId::of::<T>()).cloned();
        match local {
            Some(entry) => entry.downcast::<T>().ok(),
            None => self.parent.as_ref().and_then(|p| p.get::<T>()),
        }
    }

    /// Returns true if a value of type `T` is reachable from this bag.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Removes a locally stored value of type `T`.
    ///
    /// Parent values are untouched and become visible again.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.typed
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Stores a value under a string key.
    pub fn set_named<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.named.write().insert(key.into(), Arc::new(value));
    }

    /// Gets a value by string key, falling back to the parent chain.
    ///
    /// Returns `None` if the key is missing or holds a different type.
    #[must_use]
    pub fn get_named<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let local = self.named.read().get(key).cloned();
        match local {
            Some(entry) => entry.downcast::<T>().ok(),
            None => self.parent.as_ref().and_then(|p| p.get_named::<T>(key)),
        }
    }

    /// Returns the number of locally stored entries.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.typed.read().len() + self.named.read().len()
    }

    /// Returns true if nothing is stored locally.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_len() == 0
    }
}

impl std::fmt::Debug for ContextBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let named: Vec<String> = self.named.read().keys().cloned().collect();
        f.debug_struct("ContextBag")
            .field("typed_entries", &self.typed.read().len())
            .field("named_keys", &named)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_set_and_get() {
        let bag = ContextBag::new();
        bag.set(Marker(1));

        assert_eq!(*bag.get::<Marker>().unwrap(), Marker(1));
        assert!(bag.get::<String>().is_none());
    }

    #[test]
    fn test_parent_fallback() {
        let parent = Arc::new(ContextBag::new());
        parent.set(Marker(7));

        let child = ContextBag::with_parent(parent.clone());
        assert_eq!(*child.get::<Marker>().unwrap(), Marker(7));
        assert!(child.is_empty());
    }

    #[test]
    fn test_child_shadows_parent() {
        let parent = Arc::new(ContextBag::new());
        parent.set(Marker(1));

        let child = ContextBag::with_parent(parent.clone());
        child.set(Marker(2));

        assert_eq!(*child.get::<Marker>().unwrap(), Marker(2));
        assert_eq!(*parent.get::<Marker>().unwrap(), Marker(1));

        child.remove::<Marker>();
        assert_eq!(*child.get::<Marker>().unwrap(), Marker(1));
    }

    #[test]
    fn test_named_entries() {
        let parent = Arc::new(ContextBag::new());
        parent.set_named("retries", 3_u32);

        let child = ContextBag::with_parent(parent);
        assert_eq!(*child.get_named::<u32>("retries").unwrap(), 3);
        assert!(child.get_named::<String>("retries").is_none());
        assert!(child.get_named::<u32>("missing").is_none());
    }
}
