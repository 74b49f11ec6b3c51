//! Invalidation Engine Types
//!
//! Dependency and template indexes plus the invalidation event model.
//! Invalidating a dependency id cascades to every cache id that registered
//! it; invalidating a template cascades to every id grouped under it.
//!
//! The indexes reference cache ids by value and never own entries; a stale
//! reference (an indexed id that is no longer resident in either tier) is
//! treated as already invalidated and healed on the next cascade.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entry::{now_millis, CacheEntry};
use crate::key::CacheId;

/// Why an entry was invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationCause {
    /// Explicit invalidate call
    Explicit,
    /// Evicted by LRU pressure
    Lru,
    /// Wall-clock or inactivity expiration
    Timeout,
    /// Cascaded from a dependency-id invalidation
    Dependency,
    /// Cascaded from a template invalidation
    Template,
    /// Removed by disk tier garbage collection
    GarbageCollector,
}

/// Where an invalidation originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationSource {
    /// This cache instance
    Local,
    /// A cluster peer
    Remote,
}

/// What was invalidated: a single id or a template group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationTarget {
    /// A single cache id
    Id(CacheId),
    /// A template group
    Template(String),
}

/// A single invalidation occurrence, batched for delivery to external
/// caches and replication peers. Delivery is at-least-once; receivers must
/// treat duplicates as idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// What was invalidated
    pub target: InvalidationTarget,
    /// Cause classification
    pub cause: InvalidationCause,
    /// Originating side
    pub source: InvalidationSource,
    /// When the invalidation occurred (epoch millis)
    pub timestamp: u64,
}

impl InvalidationEvent {
    /// Event for a single cache id
    pub fn for_id(id: CacheId, cause: InvalidationCause, source: InvalidationSource) -> Self {
        Self {
            target: InvalidationTarget::Id(id),
            cause,
            source,
            timestamp: now_millis(),
        }
    }

    /// Event for a template group
    pub fn for_template(
        template: impl Into<String>,
        cause: InvalidationCause,
        source: InvalidationSource,
    ) -> Self {
        Self {
            target: InvalidationTarget::Template(template.into()),
            cause,
            source,
            timestamp: now_millis(),
        }
    }
}

/// Dependency and template indexes.
///
/// Both maps live under one lock so that registering an entry (which touches
/// both) is atomic with respect to concurrent cascades.
#[derive(Debug, Default)]
pub struct InvalidationIndexes {
    inner: RwLock<IndexMaps>,
}

#[derive(Debug, Default)]
struct IndexMaps {
    /// dependency-id -> cache ids that declared it
    by_dependency: HashMap<CacheId, HashSet<CacheId>>,
    /// template -> cache ids grouped under it
    by_template: HashMap<String, HashSet<CacheId>>,
}

impl IndexMaps {
    fn add(&mut self, entry: &CacheEntry) {
        for dep in &entry.dependency_ids {
            self.by_dependency
                .entry(dep.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        for template in &entry.templates {
            self.by_template
                .entry(template.clone())
                .or_default()
                .insert(entry.id.clone());
        }
    }

    fn remove(&mut self, id: &CacheId, deps: &[CacheId], templates: &[String]) {
        for dep in deps {
            if let Some(ids) = self.by_dependency.get_mut(dep) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_dependency.remove(dep);
                }
            }
        }
        for template in templates {
            if let Some(ids) = self.by_template.get_mut(template) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_template.remove(template);
                }
            }
        }
    }
}

impl InvalidationIndexes {
    /// Create empty indexes
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry's dependency ids and templates
    pub fn register(&self, entry: &CacheEntry) {
        if entry.dependency_ids.is_empty() && entry.templates.is_empty() {
            return;
        }
        self.inner.write().add(entry);
    }

    /// Remove an entry's index registrations (on eviction from both tiers)
    pub fn deregister(&self, entry: &CacheEntry) {
        if entry.dependency_ids.is_empty() && entry.templates.is_empty() {
            return;
        }
        self.inner
            .write()
            .remove(&entry.id, &entry.dependency_ids, &entry.templates);
    }

    /// Remove an id's registrations given only its index metadata. Used
    /// after a disk-tier eviction, where the full entry is no longer held.
    pub fn deregister_parts(&self, id: &CacheId, deps: &[CacheId], templates: &[String]) {
        if deps.is_empty() && templates.is_empty() {
            return;
        }
        self.inner.write().remove(id, deps, templates);
    }

    /// Swap an id's registrations from a replaced entry to its replacement
    /// under one lock, so a concurrent cascade never observes the id
    /// half-registered.
    pub fn reregister(&self, previous: Option<&CacheEntry>, current: Option<&CacheEntry>) {
        let mut maps = self.inner.write();
        if let Some(previous) = previous {
            maps.remove(&previous.id, &previous.dependency_ids, &previous.templates);
        }
        if let Some(current) = current {
            maps.add(current);
        }
    }

    /// Take the full id set for a dependency id, clearing the index entry.
    /// Returns an empty set if the dependency is unknown.
    pub fn take_dependency(&self, dep: &CacheId) -> HashSet<CacheId> {
        self.inner
            .write()
            .by_dependency
            .remove(dep)
            .unwrap_or_default()
    }

    /// Take the full id set for a template, clearing the index entry
    pub fn take_template(&self, template: &str) -> HashSet<CacheId> {
        self.inner
            .write()
            .by_template
            .remove(template)
            .unwrap_or_default()
    }

    /// Snapshot the ids registered under a dependency id
    pub fn ids_for_dependency(&self, dep: &CacheId) -> HashSet<CacheId> {
        self.inner
            .read()
            .by_dependency
            .get(dep)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot the ids registered under a template
    pub fn ids_for_template(&self, template: &str) -> HashSet<CacheId> {
        self.inner
            .read()
            .by_template
            .get(template)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of distinct dependency ids currently indexed
    pub fn dependency_count(&self) -> usize {
        self.inner.read().by_dependency.len()
    }

    /// Number of distinct templates currently indexed
    pub fn template_count(&self) -> usize {
        self.inner.read().by_template.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut maps = self.inner.write();
        maps.by_dependency.clear();
        maps.by_template.clear();
    }

    /// Check the index invariant against a resident-id predicate: every
    /// indexed id must be resident in some tier. Returns the stale ids.
    pub fn stale_ids<F: Fn(&CacheId) -> bool>(&self, is_resident: F) -> Vec<CacheId> {
        let maps = self.inner.read();
        let mut stale = Vec::new();
        for ids in maps.by_dependency.values().chain(maps.by_template.values()) {
            for id in ids {
                if !is_resident(id) {
                    stale.push(id.clone());
                }
            }
        }
        stale
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_entry(id: &str, deps: &[&str], templates: &[&str]) -> CacheEntry {
        CacheEntry::new(CacheId::uri(id), Bytes::from_static(b"data"))
            .with_dependencies(deps.iter().map(|d| CacheId::uri(*d)))
            .with_templates(templates.iter().copied())
    }

    #[test]
    fn test_register_and_query() {
        let indexes = InvalidationIndexes::new();
        let entry = make_entry("/a", &["dep1", "dep2"], &["/products/*"]);
        indexes.register(&entry);

        assert_eq!(indexes.ids_for_dependency(&CacheId::uri("dep1")).len(), 1);
        assert_eq!(indexes.ids_for_dependency(&CacheId::uri("dep2")).len(), 1);
        assert_eq!(indexes.ids_for_template("/products/*").len(), 1);
        assert_eq!(indexes.dependency_count(), 2);
        assert_eq!(indexes.template_count(), 1);
    }

    #[test]
    fn test_deregister_clears_empty_sets() {
        let indexes = InvalidationIndexes::new();
        let entry = make_entry("/a", &["dep1"], &["t1"]);
        indexes.register(&entry);
        indexes.deregister(&entry);

        assert_eq!(indexes.dependency_count(), 0);
        assert_eq!(indexes.template_count(), 0);
    }

    #[test]
    fn test_take_dependency_drains() {
        let indexes = InvalidationIndexes::new();
        for i in 0..5 {
            indexes.register(&make_entry(&format!("/page-{}", i), &["shared"], &[]));
        }

        let taken = indexes.take_dependency(&CacheId::uri("shared"));
        assert_eq!(taken.len(), 5);
        assert!(indexes.ids_for_dependency(&CacheId::uri("shared")).is_empty());
    }

    #[test]
    fn test_take_unknown_dependency_is_empty() {
        let indexes = InvalidationIndexes::new();
        assert!(indexes.take_dependency(&CacheId::uri("missing")).is_empty());
    }

    #[test]
    fn test_multiple_entries_share_dependency() {
        let indexes = InvalidationIndexes::new();
        let a = make_entry("/a", &["dep"], &[]);
        let b = make_entry("/b", &["dep"], &[]);
        indexes.register(&a);
        indexes.register(&b);

        assert_eq!(indexes.ids_for_dependency(&CacheId::uri("dep")).len(), 2);

        // Removing one entry leaves the other indexed
        indexes.deregister(&a);
        let remaining = indexes.ids_for_dependency(&CacheId::uri("dep"));
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&CacheId::uri("/b")));
    }

    #[test]
    fn test_deregister_parts_matches_deregister() {
        let indexes = InvalidationIndexes::new();
        let entry = make_entry("/a", &["dep1"], &["t1"]);
        indexes.register(&entry);

        indexes.deregister_parts(
            &entry.id,
            &entry.dependency_ids,
            &entry.templates,
        );
        assert_eq!(indexes.dependency_count(), 0);
        assert_eq!(indexes.template_count(), 0);
    }

    #[test]
    fn test_reregister_keeps_shared_dependencies() {
        let indexes = InvalidationIndexes::new();
        let old = make_entry("/a", &["shared", "old-only"], &["t1"]);
        indexes.register(&old);

        let new = make_entry("/a", &["shared", "new-only"], &[]);
        indexes.reregister(Some(&old), Some(&new));

        let shared = indexes.ids_for_dependency(&CacheId::uri("shared"));
        assert!(shared.contains(&CacheId::uri("/a")));
        assert!(indexes
            .ids_for_dependency(&CacheId::uri("old-only"))
            .is_empty());
        assert_eq!(indexes.ids_for_dependency(&CacheId::uri("new-only")).len(), 1);
        assert_eq!(indexes.template_count(), 0);
    }

    #[test]
    fn test_stale_id_detection() {
        let indexes = InvalidationIndexes::new();
        indexes.register(&make_entry("/live", &["dep"], &[]));
        indexes.register(&make_entry("/gone", &["dep"], &[]));

        let stale = indexes.stale_ids(|id| *id == CacheId::uri("/live"));
        assert_eq!(stale, vec![CacheId::uri("/gone")]);
    }

    #[test]
    fn test_event_constructors() {
        let ev = InvalidationEvent::for_id(
            CacheId::uri("/a"),
            InvalidationCause::Explicit,
            InvalidationSource::Local,
        );
        assert!(matches!(ev.target, InvalidationTarget::Id(_)));
        assert!(ev.timestamp > 0);

        let ev = InvalidationEvent::for_template(
            "t1",
            InvalidationCause::Template,
            InvalidationSource::Remote,
        );
        assert!(matches!(ev.target, InvalidationTarget::Template(_)));
    }
}
