//! Navigation requests and route metadata.
//!
//! A `NavigationRequest` describes where the application is trying to go.
//! Route metadata is an explicit union of a single mapping or an ordered
//! chain of mappings (nested route hierarchies produce chains); chains are
//! merged left-to-right before flag lookup, so later entries win.

use serde_json::{Map, Value};

/// Meta flag marking a route as the OIDC redirect target.
pub const META_OIDC_CALLBACK: &str = "isOidcCallback";

/// Meta flag marking a route as visible to unauthenticated users.
pub const META_PUBLIC: &str = "isPublic";

/// Route metadata: one mapping, or an ordered chain of mappings.
#[derive(Debug, Clone)]
pub enum RouteMeta {
    /// A single metadata mapping.
    Single(Map<String, Value>),
    /// An ordered chain, merged left-to-right (later entries win).
    Chain(Vec<Map<String, Value>>),
}

impl Default for RouteMeta {
    fn default() -> Self {
        Self::Single(Map::new())
    }
}

impl RouteMeta {
    /// Merges the metadata into a single mapping.
    #[must_use]
    pub fn merged(&self) -> Map<String, Value> {
        match self {
            Self::Single(map) => map.clone(),
            Self::Chain(maps) => {
                let mut merged = Map::new();
                for map in maps {
                    for (key, value) in map {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                merged
            }
        }
    }

    /// Looks up a boolean flag; absent or non-boolean values read as false.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.merged()
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A pending navigation: target path plus route metadata.
#[derive(Debug, Clone, Default)]
pub struct NavigationRequest {
    path: String,
    query: Option<String>,
    fragment: Option<String>,
    meta: RouteMeta,
}

impl NavigationRequest {
    /// Creates a request for the given path with empty metadata.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: None,
            fragment: None,
            meta: RouteMeta::default(),
        }
    }

    /// Attaches the query string (without the leading `?`).
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attaches the fragment (without the leading `#`).
    #[must_use]
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Attaches a single metadata mapping.
    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = RouteMeta::Single(meta);
        self
    }

    /// Attaches an ordered chain of metadata mappings.
    #[must_use]
    pub fn with_meta_chain(mut self, chain: Vec<Map<String, Value>>) -> Self {
        self.meta = RouteMeta::Chain(chain);
        self
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the route metadata.
    #[must_use]
    pub fn meta(&self) -> &RouteMeta {
        &self.meta
    }

    /// Returns true if this route is the OIDC redirect target.
    #[must_use]
    pub fn is_oidc_callback(&self) -> bool {
        self.meta.flag(META_OIDC_CALLBACK)
    }

    /// Returns true if this route is visible to unauthenticated users.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.meta.flag(META_PUBLIC)
    }

    /// Returns the full target: path, query, and fragment.
    ///
    /// This is what survives a login redirect as the post-login
    /// destination.
    #[must_use]
    pub fn full_target(&self) -> String {
        let mut target = self.path.clone();
        if let Some(query) = &self.query {
            target.push('?');
            target.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            target.push('#');
            target.push_str(fragment);
        }
        target
    }
}
