//! Disk Tier - Overflow Store
//!
//! Optional second tier for entries evicted from memory under LRU pressure.
//!
//! # Design
//!
//! - Pluggable `DiskBackend` (file-backed for production, in-memory for
//!   tests), mirroring the memory tier's observable behavior.
//! - An in-memory index tracks what is on disk (size, recency, dependency
//!   metadata) so queries and cleanup never touch storage.
//! - Independent eviction: once the high threshold is crossed, cleanup
//!   evicts down to the low threshold using the configured policy (LRU or
//!   size-based).
//! - Degraded mode: an I/O fault is recorded in `last_error()` and the tier
//!   behaves as a miss / refuses the offload; faults never propagate to
//!   cache callers mid-request.
//! - Backpressure: when the in-flight write backlog crosses the configured
//!   threshold, offloading writers sleep for the congestion interval before
//!   writing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CacheConfig, DiskEvictionPolicy};
use crate::entry::{now_millis, CacheEntry, EntrySource, Sharing};
use crate::error::{Error, Result};
use crate::key::CacheId;

/// Storage backend for the disk tier
#[async_trait]
pub trait DiskBackend: Send + Sync {
    /// Read the serialized record for an id
    async fn read(&self, id: &CacheId) -> Result<Option<Bytes>>;

    /// Write the serialized record for an id
    async fn write(&self, id: &CacheId, data: Bytes) -> Result<()>;

    /// Delete the record for an id
    async fn delete(&self, id: &CacheId) -> Result<bool>;

    /// Delete everything
    async fn clear(&self) -> Result<()>;
}

/// Serialized form of a cache entry on disk
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    id: CacheId,
    value: Bytes,
    priority: i32,
    dependency_ids: Vec<CacheId>,
    templates: Vec<String>,
    created_at: u64,
    expiration: Option<u64>,
    inactivity_ms: Option<u64>,
    sharing: Sharing,
    last_access: u64,
    access_count: u32,
}

impl From<&CacheEntry> for DiskRecord {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            id: entry.id.clone(),
            value: entry.value().clone(),
            priority: entry.priority.unwrap_or(0),
            dependency_ids: entry.dependency_ids.clone(),
            templates: entry.templates.clone(),
            created_at: entry.created_at,
            expiration: entry.expiration,
            inactivity_ms: entry.inactivity.map(|d| d.as_millis() as u64),
            sharing: entry.sharing,
            last_access: entry.last_access(),
            access_count: entry.access_count(),
        }
    }
}

impl DiskRecord {
    fn into_entry(self) -> CacheEntry {
        let mut entry = CacheEntry::new(self.id, self.value)
            .with_priority(self.priority)
            .with_dependencies(self.dependency_ids)
            .with_templates(self.templates)
            .with_sharing(self.sharing)
            .with_source(EntrySource::Disk);
        entry.created_at = self.created_at;
        entry.expiration = self.expiration;
        entry.inactivity = self.inactivity_ms.map(Duration::from_millis);
        entry.restore_access(self.last_access, self.access_count);
        entry
    }
}

/// Index metadata for one on-disk entry
#[derive(Debug, Clone)]
struct DiskIndexEntry {
    size: u64,
    last_access: u64,
    expiration: Option<u64>,
    dependency_ids: Vec<CacheId>,
    templates: Vec<String>,
}

/// Identity and index metadata of an entry evicted from disk, reported so
/// the invalidation engine can clear its index registrations.
#[derive(Debug, Clone)]
pub struct DiskEvicted {
    pub id: CacheId,
    pub dependency_ids: Vec<CacheId>,
    pub templates: Vec<String>,
    /// Whether the entry was dropped because it had expired (scan pass)
    pub expired: bool,
}

/// Disk tier configuration (derived from the cache configuration)
#[derive(Debug, Clone)]
pub struct DiskTierConfig {
    pub capacity: u64,
    pub high_threshold_bytes: u64,
    pub low_threshold_bytes: u64,
    pub high_threshold_percent: u8,
    pub low_threshold_percent: u8,
    pub eviction_policy: DiskEvictionPolicy,
    pub congestion_sleep: Duration,
    pub congestion_backlog_threshold: usize,
}

impl From<&CacheConfig> for DiskTierConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            capacity: config.disk_capacity,
            high_threshold_bytes: config.disk_high_threshold_bytes(),
            low_threshold_bytes: config.disk_low_threshold_bytes(),
            high_threshold_percent: config.disk_high_threshold_percent,
            low_threshold_percent: config.disk_low_threshold_percent,
            eviction_policy: config.disk_eviction_policy,
            congestion_sleep: config.congestion_sleep,
            congestion_backlog_threshold: config.congestion_backlog_threshold,
        }
    }
}

/// Disk overflow tier
pub struct DiskTier {
    backend: Arc<dyn DiskBackend>,
    config: DiskTierConfig,
    /// id -> on-disk metadata
    index: RwLock<HashMap<CacheId, DiskIndexEntry>>,
    /// Current on-disk payload bytes
    size_in_bytes: AtomicU64,
    /// In-flight writes (congestion accounting)
    pending_writes: AtomicUsize,
    /// Last I/O fault, for operator visibility
    last_error: RwLock<Option<String>>,
}

impl DiskTier {
    /// Create a disk tier over a backend
    pub fn new(backend: Arc<dyn DiskBackend>, config: DiskTierConfig) -> Self {
        Self {
            backend,
            config,
            index: RwLock::new(HashMap::new()),
            size_in_bytes: AtomicU64::new(0),
            pending_writes: AtomicUsize::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// Read an entry back from disk. I/O faults degrade to a miss.
    pub async fn get(&self, id: &CacheId) -> Option<CacheEntry> {
        if !self.index.read().contains_key(id) {
            return None;
        }

        match self.backend.read(id).await {
            Ok(Some(data)) => match serde_json::from_slice::<DiskRecord>(&data) {
                Ok(record) => Some(record.into_entry()),
                Err(e) => {
                    // Never serve corrupt data; treat as a miss
                    self.record_fault(&Error::Serialization(e));
                    self.forget(id);
                    None
                }
            },
            Ok(None) => {
                // Index said present but storage disagrees; heal the index
                self.forget(id);
                None
            }
            Err(e) => {
                self.record_fault(&e);
                None
            }
        }
    }

    /// Offload an entry to disk. Returns false (and records the fault)
    /// when the write fails or the tier is over capacity.
    pub async fn put(&self, entry: &CacheEntry) -> bool {
        let size = entry.size_in_bytes();
        if size > self.config.capacity {
            return false;
        }

        let backlog = self.pending_writes.fetch_add(1, Ordering::AcqRel) + 1;
        if backlog > self.config.congestion_backlog_threshold
            && !self.config.congestion_sleep.is_zero()
        {
            debug!(
                backlog,
                "disk write backlog over threshold, applying congestion sleep"
            );
            tokio::time::sleep(self.config.congestion_sleep).await;
        }

        let record = DiskRecord::from(entry);
        let result = match serde_json::to_vec(&record) {
            Ok(data) => self.backend.write(&entry.id, Bytes::from(data)).await,
            Err(e) => Err(Error::Serialization(e)),
        };
        self.pending_writes.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(()) => {
                let meta = DiskIndexEntry {
                    size,
                    last_access: entry.last_access(),
                    expiration: entry.effective_deadline(),
                    dependency_ids: entry.dependency_ids.clone(),
                    templates: entry.templates.clone(),
                };
                let previous = self.index.write().insert(entry.id.clone(), meta);
                self.size_in_bytes.fetch_add(size, Ordering::Relaxed);
                if let Some(old) = previous {
                    self.size_in_bytes.fetch_sub(old.size, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                self.record_fault(&e);
                false
            }
        }
    }

    /// Remove an entry from disk. Returns true if it was present.
    pub async fn remove(&self, id: &CacheId) -> bool {
        let removed = self.forget(id);
        if removed {
            if let Err(e) = self.backend.delete(id).await {
                // Index entry is already gone; the orphaned record is
                // reclaimed by the next cleanup pass
                self.record_fault(&e);
            }
        }
        removed
    }

    /// Check whether an id is on disk (index only, no I/O)
    pub fn contains(&self, id: &CacheId) -> bool {
        self.index.read().contains_key(id)
    }

    /// Dependency metadata for an on-disk entry (index only, no I/O)
    pub fn index_parts(&self, id: &CacheId) -> Option<(Vec<CacheId>, Vec<String>)> {
        self.index
            .read()
            .get(id)
            .map(|meta| (meta.dependency_ids.clone(), meta.templates.clone()))
    }

    /// Snapshot of all on-disk ids
    pub fn ids(&self) -> Vec<CacheId> {
        self.index.read().keys().cloned().collect()
    }

    /// Number of on-disk entries
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Current on-disk payload size in bytes
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes.load(Ordering::Relaxed)
    }

    /// Current on-disk payload size in megabytes
    pub fn size_in_mb(&self) -> f64 {
        self.size_in_bytes() as f64 / (1024.0 * 1024.0)
    }

    /// High threshold as a percentage of capacity
    pub fn high_threshold(&self) -> u8 {
        self.config.high_threshold_percent
    }

    /// Low threshold as a percentage of capacity
    pub fn low_threshold(&self) -> u8 {
        self.config.low_threshold_percent
    }

    /// Configured eviction policy
    pub fn eviction_policy(&self) -> DiskEvictionPolicy {
        self.config.eviction_policy
    }

    /// Last recorded I/O fault, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Whether capacity cleanup is currently needed
    pub fn over_high_threshold(&self) -> bool {
        self.size_in_bytes() > self.config.high_threshold_bytes
    }

    /// Background compaction. When over the high threshold, evicts by the
    /// configured policy down to the low threshold. `scan` additionally
    /// drops entries whose deadline has passed. Returns what was evicted so
    /// the caller can clear index registrations and record statistics.
    pub async fn cleanup(&self, scan: bool) -> Vec<DiskEvicted> {
        let mut evicted = Vec::new();

        if scan {
            let now = now_millis();
            let expired: Vec<(CacheId, DiskIndexEntry)> = {
                let index = self.index.read();
                index
                    .iter()
                    .filter(|(_, meta)| matches!(meta.expiration, Some(d) if now > d))
                    .map(|(id, meta)| (id.clone(), meta.clone()))
                    .collect()
            };
            for (id, meta) in expired {
                if self.remove(&id).await {
                    evicted.push(DiskEvicted {
                        id,
                        dependency_ids: meta.dependency_ids,
                        templates: meta.templates,
                        expired: true,
                    });
                }
            }
        }

        if self.over_high_threshold() {
            let mut candidates: Vec<(CacheId, DiskIndexEntry)> = {
                let index = self.index.read();
                index
                    .iter()
                    .map(|(id, meta)| (id.clone(), meta.clone()))
                    .collect()
            };

            match self.config.eviction_policy {
                DiskEvictionPolicy::Lru => {
                    candidates.sort_by_key(|(_, meta)| meta.last_access);
                }
                DiskEvictionPolicy::SizeBased => {
                    candidates.sort_by(|a, b| b.1.size.cmp(&a.1.size));
                }
            }

            for (id, meta) in candidates {
                if self.size_in_bytes() <= self.config.low_threshold_bytes {
                    break;
                }
                if self.remove(&id).await {
                    evicted.push(DiskEvicted {
                        id,
                        dependency_ids: meta.dependency_ids,
                        templates: meta.templates,
                        expired: false,
                    });
                }
            }

            debug!(
                evicted = evicted.len(),
                size_mb = self.size_in_mb(),
                "disk cleanup pass complete"
            );
        }

        evicted
    }

    /// Drop everything from the tier
    pub async fn clear(&self) {
        self.index.write().clear();
        self.size_in_bytes.store(0, Ordering::Relaxed);
        if let Err(e) = self.backend.clear().await {
            self.record_fault(&e);
        }
    }

    /// Remove an id from the index only
    fn forget(&self, id: &CacheId) -> bool {
        if let Some(meta) = self.index.write().remove(id) {
            self.size_in_bytes.fetch_sub(meta.size, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn record_fault(&self, error: &Error) {
        warn!(%error, "disk tier fault, degrading to memory-only behavior");
        *self.last_error.write() = Some(error.to_string());
    }
}

// =============================================================================
// Backends
// =============================================================================

/// File-per-entry backend. Records are named by the id's 64-bit hash.
pub struct FileDiskBackend {
    dir: PathBuf,
}

impl FileDiskBackend {
    /// Create a backend rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &CacheId) -> PathBuf {
        self.dir.join(format!("{:016x}.entry", id.combined_hash()))
    }
}

#[async_trait]
impl DiskBackend for FileDiskBackend {
    async fn read(&self, id: &CacheId) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, id: &CacheId, data: Bytes) -> Result<()> {
        tokio::fs::write(self.path_for(id), &data).await?;
        Ok(())
    }

    async fn delete(&self, id: &CacheId) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dent) = dir.next_entry().await? {
            if dent.path().extension().map(|e| e == "entry").unwrap_or(false) {
                tokio::fs::remove_file(dent.path()).await?;
            }
        }
        Ok(())
    }
}

/// In-memory backend for tests
#[derive(Default)]
pub struct InMemoryDiskBackend {
    records: DashMap<u64, Bytes>,
}

impl InMemoryDiskBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiskBackend for InMemoryDiskBackend {
    async fn read(&self, id: &CacheId) -> Result<Option<Bytes>> {
        Ok(self.records.get(&id.combined_hash()).map(|r| r.clone()))
    }

    async fn write(&self, id: &CacheId, data: Bytes) -> Result<()> {
        self.records.insert(id.combined_hash(), data);
        Ok(())
    }

    async fn delete(&self, id: &CacheId) -> Result<bool> {
        Ok(self.records.remove(&id.combined_hash()).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiskTierConfig {
        DiskTierConfig {
            capacity: 100_000,
            high_threshold_bytes: 80_000,
            low_threshold_bytes: 70_000,
            high_threshold_percent: 80,
            low_threshold_percent: 70,
            eviction_policy: DiskEvictionPolicy::Lru,
            congestion_sleep: Duration::ZERO,
            congestion_backlog_threshold: 64,
        }
    }

    fn make_tier() -> DiskTier {
        DiskTier::new(Arc::new(InMemoryDiskBackend::new()), test_config())
    }

    fn make_entry(id: &str, size: usize) -> CacheEntry {
        CacheEntry::new(CacheId::uri(id), Bytes::from(vec![0u8; size]))
    }

    /// Backend that fails every operation, for degraded-mode tests
    struct FailingBackend;

    #[async_trait]
    impl DiskBackend for FailingBackend {
        async fn read(&self, _: &CacheId) -> Result<Option<Bytes>> {
            Err(Error::DiskIo("simulated read fault".into()))
        }
        async fn write(&self, _: &CacheId, _: Bytes) -> Result<()> {
            Err(Error::DiskIo("simulated write fault".into()))
        }
        async fn delete(&self, _: &CacheId) -> Result<bool> {
            Err(Error::DiskIo("simulated delete fault".into()))
        }
        async fn clear(&self) -> Result<()> {
            Err(Error::DiskIo("simulated clear fault".into()))
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let tier = make_tier();
        let entry = make_entry("/a", 128)
            .with_priority(2)
            .with_dependencies([CacheId::uri("dep1")])
            .with_templates(["t1"]);
        entry.record_access();

        assert!(tier.put(&entry).await);
        assert!(tier.contains(&CacheId::uri("/a")));
        assert_eq!(tier.size_in_bytes(), 128);

        let loaded = tier.get(&CacheId::uri("/a")).await.unwrap();
        assert_eq!(loaded.value().as_ref(), entry.value().as_ref());
        assert_eq!(loaded.priority, Some(2));
        assert_eq!(loaded.dependency_ids, vec![CacheId::uri("dep1")]);
        assert_eq!(loaded.source, EntrySource::Disk);
        assert_eq!(loaded.access_count(), 1);
    }

    #[tokio::test]
    async fn test_miss() {
        let tier = make_tier();
        assert!(tier.get(&CacheId::uri("/missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let tier = make_tier();
        tier.put(&make_entry("/a", 64)).await;

        assert!(tier.remove(&CacheId::uri("/a")).await);
        assert!(!tier.contains(&CacheId::uri("/a")));
        assert_eq!(tier.size_in_bytes(), 0);
        assert!(!tier.remove(&CacheId::uri("/a")).await);
    }

    #[tokio::test]
    async fn test_replace_updates_size() {
        let tier = make_tier();
        tier.put(&make_entry("/a", 100)).await;
        tier.put(&make_entry("/a", 300)).await;
        assert_eq!(tier.size_in_bytes(), 300);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let tier = make_tier();
        assert!(!tier.put(&make_entry("/big", 200_000)).await);
        assert!(tier.last_error().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_evicts_to_low_threshold() {
        let tier = make_tier();
        // 9 x 10KB = 90KB, over the 80KB high threshold
        for i in 0..9 {
            let entry = make_entry(&format!("/p-{}", i), 10_000);
            entry.record_access();
            assert!(tier.put(&entry).await);
        }
        assert!(tier.over_high_threshold());

        let evicted = tier.cleanup(false).await;
        assert!(!evicted.is_empty());
        assert!(tier.size_in_bytes() <= 70_000);
        assert!(evicted.iter().all(|e| !e.expired));
    }

    #[tokio::test]
    async fn test_cleanup_size_based_takes_largest_first() {
        let mut config = test_config();
        config.eviction_policy = DiskEvictionPolicy::SizeBased;
        let tier = DiskTier::new(Arc::new(InMemoryDiskBackend::new()), config);

        tier.put(&make_entry("/small", 5_000)).await;
        tier.put(&make_entry("/large", 80_000)).await;
        assert!(tier.over_high_threshold());

        let evicted = tier.cleanup(false).await;
        assert_eq!(evicted[0].id, CacheId::uri("/large"));
        assert!(tier.contains(&CacheId::uri("/small")));
    }

    #[tokio::test]
    async fn test_cleanup_scan_drops_expired() {
        let tier = make_tier();
        let expired = make_entry("/old", 100).with_expiration(now_millis().saturating_sub(1000));
        tier.put(&expired).await;
        tier.put(&make_entry("/fresh", 100)).await;

        let evicted = tier.cleanup(true).await;
        assert_eq!(evicted.len(), 1);
        assert!(evicted[0].expired);
        assert_eq!(evicted[0].id, CacheId::uri("/old"));
        assert!(tier.contains(&CacheId::uri("/fresh")));
    }

    #[tokio::test]
    async fn test_degraded_mode_on_write_fault() {
        let tier = DiskTier::new(Arc::new(FailingBackend), test_config());

        assert!(!tier.put(&make_entry("/a", 64)).await);
        assert!(tier.last_error().unwrap().contains("write fault"));
        assert_eq!(tier.size_in_bytes(), 0);
        assert!(!tier.contains(&CacheId::uri("/a")));
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = make_tier();
        for i in 0..5 {
            tier.put(&make_entry(&format!("/p-{}", i), 100)).await;
        }
        tier.clear().await;
        assert!(tier.is_empty());
        assert_eq!(tier.size_in_bytes(), 0);
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = std::env::temp_dir().join(format!("dynacache-test-{}", uuid::Uuid::new_v4()));
        let backend = FileDiskBackend::new(&dir).await.unwrap();

        let id = CacheId::uri("/file-test");
        backend
            .write(&id, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let read = backend.read(&id).await.unwrap().unwrap();
        assert_eq!(read.as_ref(), b"payload");

        assert!(backend.delete(&id).await.unwrap());
        assert!(backend.read(&id).await.unwrap().is_none());
        assert!(!backend.delete(&id).await.unwrap());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_size_in_mb() {
        let mut config = test_config();
        config.capacity = 10 * 1024 * 1024;
        config.high_threshold_bytes = 8 * 1024 * 1024;
        config.low_threshold_bytes = 7 * 1024 * 1024;
        let tier = DiskTier::new(Arc::new(InMemoryDiskBackend::new()), config);

        tier.put(&make_entry("/mb", 1024 * 1024)).await;
        assert!((tier.size_in_mb() - 1.0).abs() < 0.01);
    }
}
