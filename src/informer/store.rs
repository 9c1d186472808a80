//! Key-indexed snapshot of the watched collection.
//!
//! The informer owns the only [`StoreWriter`]; everyone else gets cheap
//! [`Store`] clones that can read but never mutate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::key::key_from_parts;

type Objects<T> = HashMap<String, Arc<T>>;

/// Read-only handle to the informer cache.
#[derive(Debug)]
pub struct Store<T> {
    objects: Arc<RwLock<Objects<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<T> Store<T> {
    /// Object cached under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.objects.read().get(key).cloned()
    }

    /// Object cached under `namespace/name`.
    pub fn get_by(&self, namespace: Option<&str>, name: &str) -> Option<Arc<T>> {
        self.get(&key_from_parts(namespace, name))
    }

    /// Every cached object, in no particular order.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.objects.read().values().cloned().collect()
    }

    /// Cached objects matching `predicate`.
    pub fn list_by<P>(&self, mut predicate: P) -> Vec<Arc<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.objects
            .read()
            .values()
            .filter(|obj| predicate(obj))
            .cloned()
            .collect()
    }

    /// Every cached key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

/// The single writer of a [`Store`].
#[derive(Debug)]
pub(crate) struct StoreWriter<T> {
    objects: Arc<RwLock<Objects<T>>>,
}

impl<T> StoreWriter<T> {
    pub(crate) fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) fn as_reader(&self) -> Store<T> {
        Store {
            objects: Arc::clone(&self.objects),
        }
    }

    /// Insert `obj`, returning the state it replaced.
    pub(crate) fn insert(&self, key: String, obj: Arc<T>) -> Option<Arc<T>> {
        self.objects.write().insert(key, obj)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.objects.write().remove(key)
    }

    /// Swap in a complete new snapshot, returning the previous one.
    pub(crate) fn replace(&self, objects: Objects<T>) -> Objects<T> {
        std::mem::replace(&mut *self.objects.write(), objects)
    }

    /// Every cached entry, sorted by key.
    pub(crate) fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        let mut entries: Vec<_> = self
            .objects
            .read()
            .iter()
            .map(|(key, obj)| (key.clone(), Arc::clone(obj)))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
