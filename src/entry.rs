//! Cache Entry Types
//!
//! A `CacheEntry` carries an opaque payload plus the metadata the engine
//! needs for eviction ordering, expiration, dependency cascades, and
//! replication: priority, dependency ids, templates, timestamps, sharing
//! mode, and population source.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::key::CacheId;

/// Current wall-clock time in epoch milliseconds
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// How an entry is shared across cluster members
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Sharing {
    /// Local-only, never replicated
    NotShared,
    /// Updates are proactively pushed to peers
    Push,
    /// Peers pull the entry on demand
    Pull,
    /// Invalidations are pushed, values pulled on demand
    PushPull,
}

impl Sharing {
    /// Whether this mode participates in replication at all
    pub fn is_shared(&self) -> bool {
        !matches!(self, Sharing::NotShared)
    }
}

/// How an entry was populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntrySource {
    /// Direct set by a local caller
    Direct,
    /// Received from a cluster peer
    Remote,
    /// Reloaded from the disk tier
    Disk,
}

/// A cached entry: payload plus eviction/invalidation metadata.
#[derive(Debug)]
pub struct CacheEntry {
    /// Cache id this entry is stored under
    pub id: CacheId,
    /// Opaque payload
    value: Bytes,
    /// Eviction priority; higher priority entries survive longer under LRU
    /// pressure (each priority level grants extra trips through the LRU).
    /// None means unset; the cache applies its configured default on insert.
    pub priority: Option<i32>,
    /// Dependency ids this entry is invalidated by
    pub dependency_ids: Vec<CacheId>,
    /// Template groups this entry belongs to
    pub templates: Vec<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: u64,
    /// Absolute expiration (epoch millis); None = no wall-clock deadline
    pub expiration: Option<u64>,
    /// Inactivity window; the entry expires this long after its last access
    pub inactivity: Option<Duration>,
    /// Sharing mode for replication
    pub sharing: Sharing,
    /// How this entry was populated
    pub source: EntrySource,
    /// Payload size in bytes (for size accounting)
    size_in_bytes: u64,
    /// Last access timestamp (epoch millis)
    last_access: AtomicU64,
    /// Access count
    access_count: AtomicU32,
}

impl CacheEntry {
    /// Create a new entry with default metadata
    pub fn new(id: CacheId, value: impl Into<Bytes>) -> Self {
        let value = value.into();
        let now = now_millis();
        let size = value.len() as u64;
        Self {
            id,
            value,
            priority: None,
            dependency_ids: Vec::new(),
            templates: Vec::new(),
            created_at: now,
            expiration: None,
            inactivity: None,
            sharing: Sharing::NotShared,
            source: EntrySource::Direct,
            size_in_bytes: size,
            last_access: AtomicU64::new(now),
            access_count: AtomicU32::new(0),
        }
    }

    /// Set the eviction priority. An explicit 0 opts out of the cache's
    /// configured default.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Add dependency ids
    pub fn with_dependencies<I: IntoIterator<Item = CacheId>>(mut self, deps: I) -> Self {
        self.dependency_ids.extend(deps);
        self
    }

    /// Add template groups
    pub fn with_templates<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates.extend(templates.into_iter().map(Into::into));
        self
    }

    /// Set a time-to-live relative to now
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiration = Some(now_millis() + ttl.as_millis() as u64);
        self
    }

    /// Set an absolute expiration (epoch millis)
    pub fn with_expiration(mut self, expiration: u64) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set an inactivity window
    pub fn with_inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = Some(inactivity);
        self
    }

    /// Set the sharing mode
    pub fn with_sharing(mut self, sharing: Sharing) -> Self {
        self.sharing = sharing;
        self
    }

    /// Set the population source
    pub fn with_source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }

    /// Get the payload (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Payload size in bytes
    #[inline]
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Record an access, refreshing the inactivity clock
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_access.store(now_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last access timestamp (epoch millis)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Number of accesses since creation
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Effective expiration deadline considering both the absolute
    /// expiration and the inactivity window; None = never expires.
    pub fn effective_deadline(&self) -> Option<u64> {
        let inactivity_deadline = self
            .inactivity
            .map(|w| self.last_access() + w.as_millis() as u64);
        match (self.expiration, inactivity_deadline) {
            (Some(e), Some(i)) => Some(e.min(i)),
            (Some(e), None) => Some(e),
            (None, Some(i)) => Some(i),
            (None, None) => None,
        }
    }

    /// Check whether the entry has passed its effective deadline
    pub fn is_expired(&self) -> bool {
        match self.effective_deadline() {
            Some(deadline) => now_millis() > deadline,
            None => false,
        }
    }

    /// Restore access history (used when reloading from the disk tier)
    pub(crate) fn restore_access(&self, last_access: u64, count: u32) {
        self.last_access.store(last_access, Ordering::Relaxed);
        self.access_count.store(count, Ordering::Relaxed);
    }

    /// Replace the payload in place, preserving access history.
    /// Used by refresh; returns the previous payload size.
    pub(crate) fn refreshed(&self, value: Bytes, expiration: Option<u64>) -> CacheEntry {
        CacheEntry {
            id: self.id.clone(),
            size_in_bytes: value.len() as u64,
            value,
            priority: self.priority,
            dependency_ids: self.dependency_ids.clone(),
            templates: self.templates.clone(),
            created_at: self.created_at,
            expiration,
            inactivity: self.inactivity,
            sharing: self.sharing,
            source: self.source,
            last_access: AtomicU64::new(self.last_access()),
            access_count: AtomicU32::new(self.access_count()),
        }
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: self.value.clone(),
            priority: self.priority,
            dependency_ids: self.dependency_ids.clone(),
            templates: self.templates.clone(),
            created_at: self.created_at,
            expiration: self.expiration,
            inactivity: self.inactivity,
            sharing: self.sharing,
            source: self.source,
            size_in_bytes: self.size_in_bytes,
            last_access: AtomicU64::new(self.last_access.load(Ordering::Relaxed)),
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(data: &[u8]) -> CacheEntry {
        CacheEntry::new(CacheId::uri("/test"), Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_entry_creation() {
        let entry = make_entry(b"hello");
        assert_eq!(entry.value().as_ref(), b"hello");
        assert_eq!(entry.size_in_bytes(), 5);
        assert_eq!(entry.priority, None);
        assert_eq!(entry.sharing, Sharing::NotShared);
        assert_eq!(entry.source, EntrySource::Direct);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_builder_setters() {
        let entry = make_entry(b"x")
            .with_priority(3)
            .with_dependencies([CacheId::uri("dep1")])
            .with_templates(["/products/*"])
            .with_sharing(Sharing::Push)
            .with_inactivity(Duration::from_secs(60));

        assert_eq!(entry.priority, Some(3));
        assert_eq!(entry.dependency_ids.len(), 1);
        assert_eq!(entry.templates, vec!["/products/*".to_string()]);
        assert_eq!(entry.sharing, Sharing::Push);
        assert!(entry.inactivity.is_some());
    }

    #[test]
    fn test_access_tracking() {
        let entry = make_entry(b"data");
        assert_eq!(entry.access_count(), 0);

        let count = entry.record_access();
        assert_eq!(count, 1);
        assert_eq!(entry.access_count(), 1);
    }

    #[test]
    fn test_expiration_absolute() {
        // Deadline already in the past
        let entry = make_entry(b"data").with_expiration(now_millis().saturating_sub(1000));
        assert!(entry.is_expired());

        let entry = make_entry(b"data").with_ttl(Duration::from_secs(3600));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_effective_deadline_takes_minimum() {
        let now = now_millis();
        let entry = make_entry(b"data")
            .with_expiration(now + 100_000)
            .with_inactivity(Duration::from_secs(10));

        let deadline = entry.effective_deadline().unwrap();
        // Inactivity deadline (≈ now + 10s) is nearer than the absolute one
        assert!(deadline < now + 100_000);
    }

    #[test]
    fn test_inactivity_refreshed_by_access() {
        let entry = make_entry(b"data").with_inactivity(Duration::from_secs(10));
        let first = entry.effective_deadline().unwrap();
        std::thread::sleep(Duration::from_millis(15));
        entry.record_access();
        let second = entry.effective_deadline().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_refreshed_preserves_history() {
        let entry = make_entry(b"old");
        entry.record_access();
        entry.record_access();

        let refreshed = entry.refreshed(Bytes::from_static(b"newer"), None);
        assert_eq!(refreshed.value().as_ref(), b"newer");
        assert_eq!(refreshed.size_in_bytes(), 5);
        assert_eq!(refreshed.access_count(), 2);
        assert_eq!(refreshed.created_at, entry.created_at);
    }

    #[test]
    fn test_sharing_is_shared() {
        assert!(!Sharing::NotShared.is_shared());
        assert!(Sharing::Push.is_shared());
        assert!(Sharing::Pull.is_shared());
        assert!(Sharing::PushPull.is_shared());
    }

    #[test]
    fn test_clone_copies_counters() {
        let entry = make_entry(b"data");
        entry.record_access();
        let cloned = entry.clone();
        assert_eq!(cloned.access_count(), 1);
        assert_eq!(cloned.last_access(), entry.last_access());
    }
}
