//! Opaque identifiers and the strict ID-keyed map used for connections and streams

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::server::ServerHandle;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Engine-assigned connection identifier
    ConnectionId
);

opaque_id!(
    /// Engine-assigned stream identifier, unique within its connection
    StreamId
);

/// ID-keyed map whose `get` fails loudly instead of returning `None`.
///
/// Uniqueness is the caller's concern: `set` overwrites silently, so callers
/// check `has` before constructing a new entity.
pub struct IdentityMap<K, V> {
    kind: &'static str,
    server: ServerHandle,
    entries: DashMap<K, Arc<V>>,
}

impl<K, V> IdentityMap<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(kind: &'static str, server: ServerHandle) -> Self {
        Self {
            kind,
            server,
            entries: DashMap::new(),
        }
    }

    /// Label used in `NotFound` errors, e.g. `"Connection"`
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Server that owns this map
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    pub fn get(&self, id: &K) -> Result<Arc<V>> {
        self.entries
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServerError::NotFound {
                kind: self.kind,
                id: id.to_string(),
            })
    }

    pub fn has(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or overwrite, returning the previous entry
    pub fn set(&self, id: K, value: Arc<V>) -> Option<Arc<V>> {
        self.entries.insert(id, value)
    }

    pub fn delete(&self, id: &K) -> Option<Arc<V>> {
        self.entries.remove(id).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot of the keys currently present, in no particular order
    pub fn ids(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<K, V> fmt::Debug for IdentityMap<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.ids().iter().map(ToString::to_string).collect();
        f.debug_struct(&format!("{}Map", self.kind))
            .field("ids", &ids)
            .finish()
    }
}
