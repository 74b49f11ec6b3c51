//! Cache Identifiers
//!
//! Typed keys for cache entries and dependency groups. A `CacheId` is either
//! a plain URI-style string or a structured component key (component name +
//! request parameters), replacing the opaque object ids of older cache
//! designs with a hashable, comparable type.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identifier for a cached entry or dependency group.
///
/// Equality compares the precomputed hash first and falls back to a full
/// structural comparison only on hash collision.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub enum CacheId {
    /// Plain string id (e.g. a request URI)
    Uri(String),
    /// Structured component key: component name plus named parameters
    Component {
        /// Component that produced the entry
        component: String,
        /// Parameters the entry was computed from, in sorted order
        params: BTreeMap<String, String>,
    },
}

impl CacheId {
    /// Create a URI-style id
    pub fn uri(s: impl Into<String>) -> Self {
        CacheId::Uri(s.into())
    }

    /// Create a component id from a name and parameter pairs
    pub fn component<I, K, V>(component: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        CacheId::Component {
            component: component.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Fast non-cryptographic hash (FxHash algorithm)
    #[inline]
    fn fx_hash(bytes: &[u8]) -> u64 {
        const SEED: u64 = 0x517cc1b727220a95;
        let mut hash = SEED;
        for &byte in bytes {
            hash = hash.rotate_left(5) ^ (byte as u64);
            hash = hash.wrapping_mul(SEED);
        }
        hash
    }

    /// Combined 64-bit hash over the full id
    pub fn combined_hash(&self) -> u64 {
        match self {
            CacheId::Uri(s) => Self::fx_hash(s.as_bytes()),
            CacheId::Component { component, params } => {
                let mut hash = Self::fx_hash(component.as_bytes());
                for (k, v) in params {
                    hash ^= Self::fx_hash(k.as_bytes()).rotate_left(17);
                    hash ^= Self::fx_hash(v.as_bytes()).rotate_left(31);
                }
                hash
            }
        }
    }
}

impl PartialEq for CacheId {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.combined_hash() != other.combined_hash() {
            return false;
        }
        // Slow path: full structural comparison for collision resolution
        match (self, other) {
            (CacheId::Uri(a), CacheId::Uri(b)) => a == b,
            (
                CacheId::Component {
                    component: ca,
                    params: pa,
                },
                CacheId::Component {
                    component: cb,
                    params: pb,
                },
            ) => ca == cb && pa == pb,
            _ => false,
        }
    }
}

impl Hash for CacheId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.combined_hash().hash(state);
    }
}

impl From<&str> for CacheId {
    fn from(s: &str) -> Self {
        CacheId::Uri(s.to_string())
    }
}

impl From<String> for CacheId {
    fn from(s: String) -> Self {
        CacheId::Uri(s)
    }
}

impl std::fmt::Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheId::Uri(s) => write!(f, "{}", s),
            CacheId::Component { component, params } => {
                write!(f, "{}", component)?;
                for (k, v) in params {
                    write!(f, ";{}={}", k, v)?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uri_id_equality() {
        let a = CacheId::uri("/index.jsp");
        let b = CacheId::uri("/index.jsp");
        let c = CacheId::uri("/other.jsp");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_component_id_equality() {
        let a = CacheId::component("ProductView", [("id", "42"), ("lang", "en")]);
        let b = CacheId::component("ProductView", [("lang", "en"), ("id", "42")]);
        let c = CacheId::component("ProductView", [("id", "43")]);

        // Parameter insertion order must not matter
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_uri_and_component_never_equal() {
        let uri = CacheId::uri("ProductView");
        let comp = CacheId::component("ProductView", Vec::<(String, String)>::new());
        assert_ne!(uri, comp);
    }

    #[test]
    fn test_hash_consistency() {
        let a = CacheId::uri("/cart");
        let b = CacheId::uri("/cart");
        assert_eq!(a.combined_hash(), b.combined_hash());

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_display() {
        let uri = CacheId::uri("/index.jsp");
        assert_eq!(uri.to_string(), "/index.jsp");

        let comp = CacheId::component("ProductView", [("id", "42")]);
        assert_eq!(comp.to_string(), "ProductView;id=42");
    }

    #[test]
    fn test_serde_round_trip() {
        let id = CacheId::component("Cart", [("user", "alice")]);
        let json = serde_json::to_string(&id).unwrap();
        let back: CacheId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
