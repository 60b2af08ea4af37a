use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use http::{HeaderMap, HeaderName, HeaderValue};

/// Request headers shared by every outbound client of the host
///
/// The scheme installs the session's bearer token here; HTTP clients read a
/// snapshot when building each request. Readers never block writers.
#[derive(Clone, Default)]
pub struct SharedHeaders {
    inner: Arc<ArcSwap<HeaderMap>>,
}

impl SharedHeaders {
    /// Constructs an empty set of shared headers
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value
    pub fn set(&self, name: &HeaderName, value: HeaderValue) {
        self.inner.rcu(|current| {
            let mut next = HeaderMap::clone(current);
            next.insert(name.clone(), value.clone());
            next
        });
    }

    /// Removes a header
    pub fn remove(&self, name: &HeaderName) {
        if !self.inner.load().contains_key(name) {
            return;
        }

        self.inner.rcu(|current| {
            let mut next = HeaderMap::clone(current);
            next.remove(name);
            next
        });
    }

    /// Gets the current value of a header
    pub fn get(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.inner.load().get(name).cloned()
    }

    /// Whether the header is currently set
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.inner.load().contains_key(name)
    }

    /// Takes a consistent snapshot of all headers
    pub fn snapshot(&self) -> Arc<HeaderMap> {
        self.inner.load_full()
    }
}

impl fmt::Debug for SharedHeaders {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // HeaderMap's Debug honors sensitive values
        f.debug_tuple("SharedHeaders")
            .field(&*self.inner.load())
            .finish()
    }
}
