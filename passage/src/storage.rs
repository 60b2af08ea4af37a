//! Host key-value persistence and the namespaced wrapper over it

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;

/// The host's key-value persistence
///
/// Implementations might be backed by cookies, a browser's local storage, or
/// a server-side session store. Operations are infallible from the caller's
/// point of view; a store that cannot persist behaves as if the key was
/// never written.
pub trait Storage: Send + Sync {
    /// Gets the value stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: String);

    /// Removes the value stored under `key`
    fn remove(&self, key: &str);

    /// Lists all keys currently stored
    fn keys(&self) -> Vec<String>;
}

/// A process-local, in-memory store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Constructs a new, empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.write().insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// A view over host storage confined to a single namespace
///
/// Keys are stored in the host as `<namespace>.<key>`. Clearing the wrapper
/// removes only the keys within its own namespace, leaving anything else the
/// host stores untouched. Clones share the same underlying store.
#[derive(Clone)]
pub struct NamespacedStorage {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl NamespacedStorage {
    /// Wraps host storage in the given namespace
    pub fn new(inner: Arc<dyn Storage>, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{}.", namespace),
        }
    }

    /// The namespace of this wrapper
    pub fn namespace(&self) -> &str {
        &self.prefix[..self.prefix.len() - 1]
    }

    fn key(&self, key: &str) -> String {
        let mut k = String::with_capacity(self.prefix.len() + key.len());
        k.push_str(&self.prefix);
        k.push_str(key);
        k
    }

    /// Gets the value stored under `key` within the namespace
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.inner.get(&self.key(key))
    }

    /// Stores `value` under `key` within the namespace
    pub fn set_item(&self, key: &str, value: impl Into<String>) {
        self.inner.set(&self.key(key), value.into());
    }

    /// Removes `key` from the namespace
    pub fn remove_item(&self, key: &str) {
        self.inner.remove(&self.key(key));
    }

    /// Removes every key within the namespace
    pub fn clear(&self) {
        let keys: Vec<String> = self
            .inner
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&self.prefix))
            .collect();

        tracing::trace!(namespace = self.namespace(), count = keys.len(), "clearing storage namespace");

        for key in keys {
            self.inner.remove(&key);
        }
    }
}

impl fmt::Debug for NamespacedStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NamespacedStorage")
            .field("namespace", &self.namespace())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_are_prefixed_in_host_storage() {
        let host = Arc::new(MemoryStorage::new());
        let storage = NamespacedStorage::new(host.clone(), "client-a");

        storage.set_item("LastAuthUser", "alice");

        assert_eq!(host.get("client-a.LastAuthUser").as_deref(), Some("alice"));
        assert_eq!(storage.get_item("LastAuthUser").as_deref(), Some("alice"));
        assert_eq!(storage.namespace(), "client-a");
    }

    #[test]
    fn clear_leaves_other_namespaces_alone() {
        let host = Arc::new(MemoryStorage::new());
        let a = NamespacedStorage::new(host.clone(), "client-a");
        let b = NamespacedStorage::new(host.clone(), "client-b");

        a.set_item("one", "1");
        a.set_item("two", "2");
        b.set_item("one", "kept");
        host.set("unrelated", "kept".to_owned());

        a.clear();

        assert_eq!(a.get_item("one"), None);
        assert_eq!(a.get_item("two"), None);
        assert_eq!(b.get_item("one").as_deref(), Some("kept"));
        assert_eq!(host.get("unrelated").as_deref(), Some("kept"));
    }

    #[test]
    fn clearing_twice_is_harmless() {
        let storage = NamespacedStorage::new(Arc::new(MemoryStorage::new()), "ns");
        storage.set_item("k", "v");
        storage.clear();
        storage.clear();
        assert_eq!(storage.get_item("k"), None);
    }
}
