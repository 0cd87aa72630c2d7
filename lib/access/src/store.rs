//! The durable key-value seam.
//!
//! Login redirects unload the page, so anything that must survive them,
//! the intended post-login destination, the in-flight authorization state,
//! the persisted user, goes through an injected store. A browser host
//! backs this with origin-scoped web storage; tests and native hosts use
//! [`MemoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed key under which the post-login destination is persisted.
pub const ACTIVE_ROUTE_KEY: &str = "portcullis_active_route";

/// An origin-scoped string key-value store.
///
/// Operations are total: a backend that cannot write absorbs the failure
/// rather than surfacing it, matching web-storage semantics.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str);

    /// Removes the value stored under `key`, if any.
    fn remove(&self, key: &str);
}

/// An in-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .remove(key);
    }
}
