//! Replication / Push-Pull Coordination
//!
//! Tracks which cache ids are shared across cluster members and decides
//! push versus pull semantics per id. The transport itself is behind the
//! `RemoteServices` trait; this crate only coordinates.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::entry::Sharing;
use crate::error::Result;
use crate::invalidation::InvalidationEvent;
use crate::key::CacheId;

/// Cluster replication transport (out of scope for this crate; implemented
/// by the hosting environment)
#[async_trait]
pub trait RemoteServices: Send + Sync {
    /// Identity of the local node
    fn node_id(&self) -> &str;

    /// Deliver a batch of invalidation notifications to peers
    async fn batch_notify(&self, events: &[InvalidationEvent]) -> Result<()>;

    /// Push an updated entry payload to peers
    async fn push(&self, id: &CacheId, value: Bytes) -> Result<()>;

    /// Pull an entry payload from whichever peer owns it
    async fn pull(&self, id: &CacheId) -> Result<Option<Bytes>>;
}

/// No-op transport for unclustered caches and tests
pub struct NoopRemoteServices {
    node_id: String,
}

impl NoopRemoteServices {
    pub fn new() -> Self {
        Self {
            node_id: format!("local-{}", Uuid::new_v4()),
        }
    }
}

impl Default for NoopRemoteServices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteServices for NoopRemoteServices {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn batch_notify(&self, _events: &[InvalidationEvent]) -> Result<()> {
        Ok(())
    }

    async fn push(&self, _id: &CacheId, _value: Bytes) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, _id: &CacheId) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

/// Shared no-op transport used when replication is disabled
pub(crate) static NOOP_REMOTE: Lazy<Arc<NoopRemoteServices>> =
    Lazy::new(|| Arc::new(NoopRemoteServices::new()));

/// Sharing metadata for one replicated cache id
#[derive(Debug, Clone)]
pub struct PushPullEntry {
    /// Sharing mode the entry was registered with
    pub sharing: Sharing,
    /// Node that owns the authoritative copy
    pub owner: String,
}

/// Push-pull coordinator: per-id sharing table plus pull/push decisions
pub struct PushPullCoordinator {
    table: DashMap<CacheId, PushPullEntry>,
    enabled: bool,
}

impl PushPullCoordinator {
    /// Create a coordinator; a disabled coordinator keeps an empty table
    /// and never elects to pull
    pub fn new(enabled: bool) -> Self {
        Self {
            table: DashMap::new(),
            enabled,
        }
    }

    /// Whether replication is configured at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register an id as shared. Local-only entries are never tabled.
    pub fn register(&self, id: &CacheId, sharing: Sharing, owner: &str) {
        if !self.enabled || !sharing.is_shared() {
            return;
        }
        self.table.insert(
            id.clone(),
            PushPullEntry {
                sharing,
                owner: owner.to_string(),
            },
        );
    }

    /// Drop an id's sharing metadata (invalidation or renounce)
    pub fn remove(&self, id: &CacheId) -> bool {
        self.table.remove(id).is_some()
    }

    /// Decide whether the local node should pull this id from a peer
    /// instead of serving a possibly stale local copy. Pull applies to the
    /// pull-oriented sharing modes when a different node owns the entry.
    pub fn should_pull(&self, sharing: Sharing, id: &CacheId, local_node: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if !matches!(sharing, Sharing::Pull | Sharing::PushPull) {
            return false;
        }
        match self.table.get(id) {
            Some(entry) => entry.owner != local_node,
            None => false,
        }
    }

    /// Number of ids currently tabled
    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    /// Snapshot of all tabled ids
    pub fn ids(&self) -> Vec<CacheId> {
        self.table.iter().map(|e| e.key().clone()).collect()
    }

    /// Fast check used to skip replication work entirely
    pub fn has_entries(&self) -> bool {
        !self.table.is_empty()
    }

    /// Look up an id's sharing metadata
    pub fn get(&self, id: &CacheId) -> Option<PushPullEntry> {
        self.table.get(id).map(|e| e.clone())
    }

    /// Drop everything
    pub fn clear(&self) {
        self.table.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_coordinator_registers_nothing() {
        let coordinator = PushPullCoordinator::new(false);
        coordinator.register(&CacheId::uri("/a"), Sharing::Push, "node-1");

        assert!(!coordinator.has_entries());
        assert_eq!(coordinator.table_size(), 0);
        assert!(!coordinator.should_pull(Sharing::Pull, &CacheId::uri("/a"), "node-1"));
    }

    #[test]
    fn test_not_shared_entries_never_tabled() {
        let coordinator = PushPullCoordinator::new(true);
        coordinator.register(&CacheId::uri("/a"), Sharing::NotShared, "node-1");
        assert!(!coordinator.has_entries());
    }

    #[test]
    fn test_should_pull_per_sharing_mode() {
        let coordinator = PushPullCoordinator::new(true);
        let id = CacheId::uri("/a");
        coordinator.register(&id, Sharing::Pull, "node-2");

        // Pull-mode entry owned elsewhere: pull
        assert!(coordinator.should_pull(Sharing::Pull, &id, "node-1"));
        // Same entry viewed from its owner: no pull
        assert!(!coordinator.should_pull(Sharing::Pull, &id, "node-2"));
        // Push-mode never pulls
        assert!(!coordinator.should_pull(Sharing::Push, &id, "node-1"));
        // Unknown id never pulls
        assert!(!coordinator.should_pull(Sharing::Pull, &CacheId::uri("/other"), "node-1"));
    }

    #[test]
    fn test_push_pull_mode_pulls() {
        let coordinator = PushPullCoordinator::new(true);
        let id = CacheId::uri("/a");
        coordinator.register(&id, Sharing::PushPull, "node-2");
        assert!(coordinator.should_pull(Sharing::PushPull, &id, "node-1"));
    }

    #[test]
    fn test_remove_and_queries() {
        let coordinator = PushPullCoordinator::new(true);
        coordinator.register(&CacheId::uri("/a"), Sharing::Push, "node-1");
        coordinator.register(&CacheId::uri("/b"), Sharing::Pull, "node-1");

        assert_eq!(coordinator.table_size(), 2);
        assert!(coordinator.has_entries());
        assert_eq!(coordinator.ids().len(), 2);

        assert!(coordinator.remove(&CacheId::uri("/a")));
        assert!(!coordinator.remove(&CacheId::uri("/a")));
        assert_eq!(coordinator.table_size(), 1);
    }

    #[tokio::test]
    async fn test_noop_remote_services() {
        let remote = NoopRemoteServices::new();
        assert!(remote.node_id().starts_with("local-"));
        assert!(remote.batch_notify(&[]).await.is_ok());
        assert!(remote.pull(&CacheId::uri("/a")).await.unwrap().is_none());
    }
}
