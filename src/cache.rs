//! Cache Engine and Facade
//!
//! `CacheCore` wires the tiers together: memory store, optional disk tier,
//! dependency/template indexes, listener registry, statistics, push-pull
//! coordination, and the pending-event queues. `DynaCache` is the public
//! facade that owns the core and the daemon lifecycle.
//!
//! # Design
//!
//! - Every mutating operation keeps the cross-structure invariant: an id
//!   resident in neither tier has no index registrations, no deadline, and
//!   no push-pull table entry.
//! - Invalidation cascades iteratively over a worklist; an id invalidated
//!   as a dependency is itself treated as a dependency id, so chains of
//!   dependent entries fall together.
//! - Invalidations and pushes are never delivered inline; they are queued
//!   and drained by the batch update daemon.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::daemons::{
    AuditLog, BatchUpdateDaemon, DaemonSet, DeadlineRegistry, InvalidationAuditDaemon, Shutdown,
    TimeLimitDaemon,
};
use crate::disk::{DiskBackend, DiskEvicted, DiskTier, DiskTierConfig, FileDiskBackend};
use crate::entry::{now_millis, CacheEntry, EntrySource, Sharing};
use crate::error::{Error, Result};
use crate::external::{ExternalCacheServices, NoopExternalCacheServices, PendingEvents, PushEvent};
use crate::invalidation::{
    InvalidationCause, InvalidationEvent, InvalidationIndexes, InvalidationSource,
};
use crate::key::CacheId;
use crate::listeners::{
    ChangeListener, InvalidationListener, ListenerRegistry, PreInvalidationListener,
};
use crate::replication::{PushPullCoordinator, RemoteServices, NOOP_REMOTE};
use crate::stats::CacheStatistics;
use crate::store::EntryStore;

/// Outcome of an LRU eviction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreeLruEntryResult {
    /// The memory tier was empty
    NoEntry,
    /// The victim was written to the disk tier and stays resident there
    Offloaded(CacheId),
    /// The victim was dropped (no disk tier, or the offload failed)
    Discarded(CacheId),
    /// The victim had already expired and was invalidated instead
    Expired(CacheId),
}

/// Core cache engine shared by the facade and the daemons
pub struct CacheCore {
    config: CacheConfig,
    store: EntryStore,
    disk: OnceCell<Arc<DiskTier>>,
    indexes: InvalidationIndexes,
    listeners: ListenerRegistry,
    stats: CacheStatistics,
    coordinator: PushPullCoordinator,
    pending: PendingEvents,
    deadlines: DeadlineRegistry,
    audit: AuditLog,
    external: Arc<dyn ExternalCacheServices>,
    remote: Arc<dyn RemoteServices>,
    running: AtomicBool,
}

impl CacheCore {
    fn new(
        config: CacheConfig,
        remote: Arc<dyn RemoteServices>,
        external: Arc<dyn ExternalCacheServices>,
    ) -> Self {
        let coordinator = PushPullCoordinator::new(config.enable_cache_replication);
        Self {
            config,
            store: EntryStore::new(),
            disk: OnceCell::new(),
            indexes: InvalidationIndexes::new(),
            listeners: ListenerRegistry::new(),
            stats: CacheStatistics::new(),
            coordinator,
            pending: PendingEvents::new(),
            deadlines: DeadlineRegistry::new(),
            audit: AuditLog::new(),
            external,
            remote,
            running: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn disk(&self) -> Option<&Arc<DiskTier>> {
        self.disk.get()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    pub fn indexes(&self) -> &InvalidationIndexes {
        &self.indexes
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn deadlines(&self) -> &DeadlineRegistry {
        &self.deadlines
    }

    pub(crate) fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn pending_events(&self) -> &PendingEvents {
        &self.pending
    }

    pub(crate) fn external(&self) -> &Arc<dyn ExternalCacheServices> {
        &self.external
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteServices> {
        &self.remote
    }

    pub fn replication_enabled(&self) -> bool {
        self.coordinator.is_enabled()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::Stopped(self.config.cache_name.clone()))
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up an entry, consulting memory, then disk, then (for shared ids
    /// owned elsewhere) cluster peers. An expired entry is invalidated and
    /// reported as a miss.
    pub async fn get_entry(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.store.get(id) {
            if entry.is_expired() {
                self.stats.record_memory_miss();
                self.invalidate_by_id(
                    id,
                    InvalidationCause::Timeout,
                    InvalidationSource::Local,
                    true,
                )
                .await;
                return None;
            }
            self.stats.record_memory_hit();
            return Some(entry);
        }
        self.stats.record_memory_miss();

        if let Some(disk) = self.disk.get() {
            let started = Instant::now();
            if let Some(entry) = disk.get(id).await {
                self.stats.record_disk_read_latency(started.elapsed());
                if entry.is_expired() {
                    self.stats.record_disk_miss();
                    self.invalidate_by_id(
                        id,
                        InvalidationCause::Timeout,
                        InvalidationSource::Local,
                        true,
                    )
                    .await;
                    return None;
                }
                self.stats.record_disk_hit();
                // Promote: the entry moves back to memory, not copies
                disk.remove(id).await;
                self.promote(entry).await;
                return self.store.peek(id);
            }
            self.stats.record_disk_miss();
        }

        self.pull_from_peer(id).await
    }

    /// Look up just the payload
    pub async fn get_value(&self, id: &CacheId) -> Option<Bytes> {
        self.get_entry(id).await.map(|e| e.value().clone())
    }

    async fn pull_from_peer(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        let meta = self.coordinator.get(id)?;
        if !self.should_pull(meta.sharing, id) {
            return None;
        }
        match self.remote.pull(id).await {
            Ok(Some(value)) => {
                self.stats.record_remote_fetch();
                let entry = CacheEntry::new(id.clone(), value).with_sharing(meta.sharing);
                if let Err(error) = self.set_entry(entry, EntrySource::Remote, false, true).await {
                    debug!(%error, %id, "failed to cache pulled entry");
                    return None;
                }
                self.store.peek(id)
            }
            Ok(None) => None,
            Err(error) => {
                debug!(%error, %id, "remote pull failed, treating as miss");
                None
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace an entry. `coordinate` enables replication side
    /// effects (push-pull registration and push events); `ignore_counting`
    /// suppresses statistics for internal repopulation.
    pub async fn set_entry(
        &self,
        mut entry: CacheEntry,
        source: EntrySource,
        coordinate: bool,
        ignore_counting: bool,
    ) -> Result<()> {
        self.ensure_running()?;
        entry.source = source;
        if entry.priority.is_none() {
            entry.priority = Some(self.config.default_priority);
        }

        let id = entry.id.clone();
        let sharing = entry.sharing;
        let deadline = entry.effective_deadline();
        let push_value = (coordinate
            && self.coordinator.is_enabled()
            && matches!(sharing, Sharing::Push | Sharing::PushPull))
        .then(|| entry.value().clone());

        // The entry must be resident before its dependency ids are indexed:
        // a cascade that takes an indexed id always finds the entry, so a
        // resident entry can never end up missing from the index. The old
        // and new registrations are swapped under one lock, keeping shared
        // dependency ids intact across a replace.
        let previous = self.store.insert(entry);
        let current = self.store.peek(&id);
        self.indexes.reregister(previous.as_deref(), current.as_deref());
        match deadline {
            Some(d) => self.deadlines.register(id.clone(), d),
            None => self.deadlines.cancel(&id),
        }
        if coordinate {
            self.coordinator
                .register(&id, sharing, self.remote.node_id());
        }

        // A disk copy of a replaced entry is stale now
        if let Some(disk) = self.disk.get() {
            if disk.contains(&id) {
                disk.remove(&id).await;
            }
        }

        if let Some(current) = &current {
            self.listeners.fire_change(current);
        }
        if let Some(value) = push_value {
            self.pending.queue_push(PushEvent {
                id: id.clone(),
                value,
                timestamp: now_millis(),
            });
        }
        if !ignore_counting && source == EntrySource::Remote {
            self.stats.record_remote_update();
        }

        self.enforce_capacity().await;
        Ok(())
    }

    /// Insert a plain value under an id with default metadata
    pub async fn set_value(&self, id: CacheId, value: impl Into<Bytes>) -> Result<()> {
        self.set_entry(
            CacheEntry::new(id, value),
            EntrySource::Direct,
            true,
            false,
        )
        .await
    }

    /// Replace a resident entry's payload in place, keeping its recency
    /// position, metadata, and access history. Returns false if the id is
    /// not resident in memory.
    pub async fn refresh_entry(
        &self,
        id: &CacheId,
        value: Bytes,
        expiration: Option<u64>,
    ) -> Result<bool> {
        self.ensure_running()?;
        let Some(entry) = self.store.refresh(id, value.clone(), expiration) else {
            return Ok(false);
        };
        match entry.effective_deadline() {
            Some(d) => self.deadlines.register(id.clone(), d),
            None => self.deadlines.cancel(id),
        }
        self.listeners.fire_change(&entry);
        if self.coordinator.is_enabled()
            && matches!(entry.sharing, Sharing::Push | Sharing::PushPull)
        {
            self.pending.queue_push(PushEvent {
                id: id.clone(),
                value,
                timestamp: now_millis(),
            });
        }
        Ok(true)
    }

    async fn promote(&self, entry: CacheEntry) {
        let id = entry.id.clone();
        let deadline = entry.effective_deadline();
        self.store.insert(entry);
        // Registration is idempotent; the entry kept its index entries
        // while it lived on disk. Indexing after the insert keeps indexed
        // ids resident at all times.
        if let Some(current) = self.store.peek(&id) {
            self.indexes.register(&current);
        }
        if let Some(deadline) = deadline {
            self.deadlines.register(id, deadline);
        }
        self.enforce_capacity().await;
    }

    async fn enforce_capacity(&self) {
        while self.store.len() > self.config.max_memory_entries {
            if matches!(self.free_lru_entry().await, FreeLruEntryResult::NoEntry) {
                break;
            }
        }
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Evict the least-recently-used memory entry, offloading it to the
    /// disk tier when one is configured.
    pub async fn free_lru_entry(&self) -> FreeLruEntryResult {
        let Some(entry) = self.store.pop_lru() else {
            return FreeLruEntryResult::NoEntry;
        };
        let id = entry.id.clone();

        if entry.is_expired() {
            self.indexes.deregister(&entry);
            self.deadlines.cancel(&id);
            self.coordinator.remove(&id);
            if let Some(disk) = self.disk.get() {
                if disk.contains(&id) {
                    disk.remove(&id).await;
                }
            }
            self.stats.record_timeout_invalidation();
            let event = InvalidationEvent::for_id(
                id.clone(),
                InvalidationCause::Timeout,
                InvalidationSource::Local,
            );
            self.listeners.fire_invalidation(&event);
            if self.is_running() {
                self.pending
                    .queue_invalidation(id.clone(), InvalidationCause::Timeout);
            }
            self.audit.record(id.clone());
            return FreeLruEntryResult::Expired(id);
        }

        if let Some(disk) = self.disk.get() {
            let started = Instant::now();
            if disk.put(&entry).await {
                self.stats.record_disk_write_latency(started.elapsed());
                self.stats.record_offload(entry.size_in_bytes());
                self.stats.record_lru_eviction();
                if disk.over_high_threshold() {
                    let evicted = disk.cleanup(false).await;
                    self.absorb_disk_evictions(evicted).await;
                }
                return FreeLruEntryResult::Offloaded(id);
            }
            warn!(%id, "disk offload failed, discarding LRU victim");
        }

        // No disk tier, or the offload failed: the entry leaves the cache
        self.stats.record_lru_eviction();
        self.indexes.deregister(&entry);
        self.deadlines.cancel(&id);
        self.coordinator.remove(&id);
        let event = InvalidationEvent::for_id(
            id.clone(),
            InvalidationCause::Lru,
            InvalidationSource::Local,
        );
        self.listeners.fire_invalidation(&event);
        if self.is_running() {
            self.pending
                .queue_invalidation(id.clone(), InvalidationCause::Lru);
        }
        FreeLruEntryResult::Discarded(id)
    }

    /// Clear registrations and report eviction events for entries the disk
    /// tier evicted on its own
    pub(crate) async fn absorb_disk_evictions(&self, evicted: Vec<DiskEvicted>) {
        for item in evicted {
            // Still resident in memory: registrations stay
            if self.store.contains(&item.id) {
                continue;
            }
            self.indexes
                .deregister_parts(&item.id, &item.dependency_ids, &item.templates);
            self.deadlines.cancel(&item.id);
            self.coordinator.remove(&item.id);
            self.stats.record_disk_eviction();
            let cause = if item.expired {
                self.stats.record_timeout_invalidation();
                InvalidationCause::GarbageCollector
            } else {
                InvalidationCause::Lru
            };
            let event =
                InvalidationEvent::for_id(item.id.clone(), cause, InvalidationSource::Local);
            self.listeners.fire_invalidation(&event);
            if self.is_running() {
                self.pending.queue_invalidation(item.id, cause);
            }
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Invalidate a single id, cascading to every entry that declared it as
    /// a dependency. `wait` makes the disk removal synchronous. Returns
    /// false when nothing was removed (absent or vetoed).
    pub async fn invalidate_by_id(
        &self,
        id: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        wait: bool,
    ) -> bool {
        self.invalidate_by_id_opts(id, cause, source, wait, true, false)
            .await
    }

    /// Full-control variant: `fire_listeners` suppresses callbacks,
    /// `renounce` drops push-pull ownership without notifying peers or
    /// external caches.
    pub async fn invalidate_by_id_opts(
        &self,
        id: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        wait: bool,
        fire_listeners: bool,
        renounce: bool,
    ) -> bool {
        if renounce {
            self.coordinator.remove(id);
        }
        if cause == InvalidationCause::Explicit && fire_listeners {
            let event = InvalidationEvent::for_id(id.clone(), cause, source);
            if !self.listeners.allows_invalidation(&event) {
                debug!(%id, "invalidation vetoed by pre-invalidation listener");
                return false;
            }
        }
        let removed = self
            .cascade_invalidate(
                vec![(id.clone(), cause)],
                source,
                wait,
                fire_listeners,
                !renounce,
            )
            .await;
        removed > 0
    }

    /// Invalidate every entry registered under a dependency id. Returns the
    /// number of entries removed (cascades included).
    pub async fn invalidate_by_dependency(
        &self,
        dep: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        fire_listeners: bool,
    ) -> usize {
        let ids = self.indexes.take_dependency(dep);
        if ids.is_empty() {
            return 0;
        }
        let roots = ids.into_iter().map(|id| (id, cause)).collect();
        self.cascade_invalidate(roots, source, true, fire_listeners, true)
            .await
    }

    /// Invalidate every entry grouped under a template. One template event
    /// is queued for external delivery rather than one event per member.
    pub async fn invalidate_by_template(&self, template: &str, wait: bool) -> usize {
        let ids = self.indexes.take_template(template);
        if self.is_running() {
            self.pending
                .queue_template_invalidation(template.to_string());
        }
        if ids.is_empty() {
            return 0;
        }
        let roots = ids
            .into_iter()
            .map(|id| (id, InvalidationCause::Template))
            .collect();
        self.cascade_invalidate(roots, InvalidationSource::Local, wait, true, false)
            .await
    }

    /// Worklist cascade: each removed id is itself treated as a dependency
    /// id, so dependent chains fall in one pass. Ids indexed but resident in
    /// neither tier count as already invalidated and are healed silently.
    async fn cascade_invalidate(
        &self,
        roots: Vec<(CacheId, InvalidationCause)>,
        source: InvalidationSource,
        wait: bool,
        fire_listeners: bool,
        notify: bool,
    ) -> usize {
        let mut removed = 0;
        let mut queue: VecDeque<(CacheId, InvalidationCause)> = roots.into();
        while let Some((id, cause)) = queue.pop_front() {
            if self
                .remove_single(&id, cause, source, wait, fire_listeners, notify)
                .await
            {
                removed += 1;
            }
            for dependent in self.indexes.take_dependency(&id) {
                queue.push_back((dependent, InvalidationCause::Dependency));
            }
        }
        removed
    }

    async fn remove_single(
        &self,
        id: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        wait: bool,
        fire_listeners: bool,
        notify: bool,
    ) -> bool {
        let mem = self.store.remove(id);
        let mut present = mem.is_some();
        if let Some(entry) = &mem {
            self.indexes.deregister(entry);
        }

        if let Some(disk) = self.disk.get() {
            if disk.contains(id) {
                present = true;
                if mem.is_none() {
                    if let Some((deps, templates)) = disk.index_parts(id) {
                        self.indexes.deregister_parts(id, &deps, &templates);
                    }
                }
                if wait {
                    disk.remove(id).await;
                } else {
                    let disk = Arc::clone(disk);
                    let id = id.clone();
                    tokio::spawn(async move {
                        disk.remove(&id).await;
                    });
                }
            }
        }

        self.deadlines.cancel(id);
        self.coordinator.remove(id);
        if !present {
            return false;
        }

        self.record_invalidation(cause, source);
        if fire_listeners {
            let event = InvalidationEvent::for_id(id.clone(), cause, source);
            self.listeners.fire_invalidation(&event);
        }
        // A stopped cache still applies invalidations locally but queues no
        // events: nothing drains the queues once the daemons are gone
        if notify && source == InvalidationSource::Local && self.is_running() {
            self.pending.queue_invalidation(id.clone(), cause);
        }
        self.audit.record(id.clone());
        true
    }

    fn record_invalidation(&self, cause: InvalidationCause, source: InvalidationSource) {
        match cause {
            InvalidationCause::Explicit => self.stats.record_explicit_invalidation(),
            InvalidationCause::Timeout => self.stats.record_timeout_invalidation(),
            InvalidationCause::Dependency => self.stats.record_dependency_invalidation(),
            InvalidationCause::Template => self.stats.record_template_invalidation(),
            InvalidationCause::Lru | InvalidationCause::GarbageCollector => {}
        }
        if source == InvalidationSource::Remote {
            self.stats.record_remote_invalidation();
        }
    }

    /// Drop every entry from both tiers along with all registrations.
    /// Statistics survive a clear.
    pub async fn clear(&self) {
        self.store.clear();
        if let Some(disk) = self.disk.get() {
            disk.clear().await;
        }
        self.indexes.clear();
        self.coordinator.clear();
        self.deadlines.clear();
        self.pending.clear();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether an id is resident in either tier
    pub fn contains_cache_id(&self, id: &CacheId) -> bool {
        self.store.contains(id) || self.disk.get().map(|d| d.contains(id)).unwrap_or(false)
    }

    /// Snapshot of all resident ids across both tiers
    pub fn cache_ids(&self) -> Vec<CacheId> {
        let mut ids = self.store.ids();
        if let Some(disk) = self.disk.get() {
            for id in disk.ids() {
                if !self.store.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Ids registered under a dependency id
    pub fn ids_by_dependency(&self, dep: &CacheId) -> Vec<CacheId> {
        self.indexes.ids_for_dependency(dep).into_iter().collect()
    }

    /// Ids grouped under a template
    pub fn ids_by_template(&self, template: &str) -> Vec<CacheId> {
        self.indexes.ids_for_template(template).into_iter().collect()
    }

    // =========================================================================
    // Replication queries
    // =========================================================================

    pub fn push_pull_table_size(&self) -> usize {
        self.coordinator.table_size()
    }

    pub fn ids_in_push_pull_table(&self) -> Vec<CacheId> {
        self.coordinator.ids()
    }

    pub fn has_push_pull_entries(&self) -> bool {
        self.coordinator.has_entries()
    }

    /// Whether a lookup for this id should go to a peer instead of the
    /// (absent or possibly stale) local copy
    pub fn should_pull(&self, sharing: Sharing, id: &CacheId) -> bool {
        self.coordinator
            .should_pull(sharing, id, self.remote.node_id())
    }
}

// =============================================================================
// Facade
// =============================================================================

/// A dynamic cache instance: configuration, two storage tiers, invalidation
/// engine, statistics, and three background daemons.
///
/// Construct with [`DynaCache::new`], call [`DynaCache::start`] before use,
/// and [`DynaCache::stop`] for an orderly shutdown that drains pending
/// events.
pub struct DynaCache {
    core: Arc<CacheCore>,
    disk_backend: Mutex<Option<Arc<dyn DiskBackend>>>,
    daemons: Mutex<Option<DaemonSet>>,
}

impl DynaCache {
    /// Create an unclustered cache with no external consumers
    pub fn new(config: CacheConfig) -> Self {
        let remote: Arc<dyn RemoteServices> = NOOP_REMOTE.clone();
        let external: Arc<dyn ExternalCacheServices> = Arc::new(NoopExternalCacheServices);
        Self::with_services(config, remote, external)
    }

    /// Create a cache wired to a replication transport and an external
    /// cache adapter
    pub fn with_services(
        config: CacheConfig,
        remote: Arc<dyn RemoteServices>,
        external: Arc<dyn ExternalCacheServices>,
    ) -> Self {
        Self {
            core: Arc::new(CacheCore::new(config, remote, external)),
            disk_backend: Mutex::new(None),
            daemons: Mutex::new(None),
        }
    }

    /// Override the disk backend (the file backend is used by default when
    /// disk offload is enabled). Must be called before `start()`.
    pub fn with_disk_backend(self, backend: Arc<dyn DiskBackend>) -> Self {
        *self.disk_backend.lock() = Some(backend);
        self
    }

    /// Validate the configuration, initialize the disk tier, and spawn the
    /// background daemons. Idempotent once started.
    pub async fn start(&self) -> Result<()> {
        if self.core.is_running() {
            return Ok(());
        }
        self.core.config().validate()?;

        if self.core.config().enable_disk_offload && self.core.disk.get().is_none() {
            let override_backend = self.disk_backend.lock().take();
            let backend: Arc<dyn DiskBackend> = match override_backend {
                Some(backend) => backend,
                None => {
                    Arc::new(FileDiskBackend::new(&self.core.config().disk_cache_dir).await?)
                }
            };
            let tier = DiskTier::new(backend, DiskTierConfig::from(self.core.config()));
            let _ = self.core.disk.set(Arc::new(tier));
        }

        self.core.set_running(true);

        let shutdown = Arc::new(Shutdown::new());
        let handles = vec![
            tokio::spawn(TimeLimitDaemon::run(
                Arc::clone(&self.core),
                Arc::clone(&shutdown),
            )),
            tokio::spawn(BatchUpdateDaemon::run(
                Arc::clone(&self.core),
                Arc::clone(&shutdown),
            )),
            tokio::spawn(InvalidationAuditDaemon::run(
                Arc::clone(&self.core),
                Arc::clone(&shutdown),
            )),
        ];
        *self.daemons.lock() = Some(DaemonSet { shutdown, handles });

        info!(
            cache = %self.core.config().cache_name,
            max_entries = self.core.config().max_memory_entries,
            disk = self.core.config().enable_disk_offload,
            replication = self.core.config().enable_cache_replication,
            "cache started"
        );
        Ok(())
    }

    /// Stop the daemons. New writes are rejected after this; invalidations
    /// still apply locally but no longer queue events for delivery. The
    /// batch update daemon drains already-queued events once before exiting.
    pub async fn stop(&self) {
        self.core.set_running(false);
        let daemons = self.daemons.lock().take();
        if let Some(daemons) = daemons {
            daemons.shutdown.signal();
            for result in futures::future::join_all(daemons.handles).await {
                if let Err(error) = result {
                    warn!(%error, "daemon task failed during shutdown");
                }
            }
        }
        info!(cache = %self.core.config().cache_name, "cache stopped");
    }

    // =========================================================================
    // Delegation
    // =========================================================================

    pub async fn get_entry(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        self.core.get_entry(id).await
    }

    pub async fn get_value(&self, id: &CacheId) -> Option<Bytes> {
        self.core.get_value(id).await
    }

    pub async fn set_entry(
        &self,
        entry: CacheEntry,
        source: EntrySource,
        coordinate: bool,
        ignore_counting: bool,
    ) -> Result<()> {
        self.core
            .set_entry(entry, source, coordinate, ignore_counting)
            .await
    }

    pub async fn set_value(&self, id: CacheId, value: impl Into<Bytes>) -> Result<()> {
        self.core.set_value(id, value).await
    }

    pub async fn refresh_entry(
        &self,
        id: &CacheId,
        value: Bytes,
        expiration: Option<u64>,
    ) -> Result<bool> {
        self.core.refresh_entry(id, value, expiration).await
    }

    pub async fn free_lru_entry(&self) -> FreeLruEntryResult {
        self.core.free_lru_entry().await
    }

    pub async fn invalidate_by_id(
        &self,
        id: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        wait: bool,
    ) -> bool {
        self.core.invalidate_by_id(id, cause, source, wait).await
    }

    pub async fn invalidate_by_id_opts(
        &self,
        id: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        wait: bool,
        fire_listeners: bool,
        renounce: bool,
    ) -> bool {
        self.core
            .invalidate_by_id_opts(id, cause, source, wait, fire_listeners, renounce)
            .await
    }

    pub async fn invalidate_by_dependency(
        &self,
        dep: &CacheId,
        cause: InvalidationCause,
        source: InvalidationSource,
        fire_listeners: bool,
    ) -> usize {
        self.core
            .invalidate_by_dependency(dep, cause, source, fire_listeners)
            .await
    }

    pub async fn invalidate_by_template(&self, template: &str, wait: bool) -> usize {
        self.core.invalidate_by_template(template, wait).await
    }

    pub async fn clear(&self) {
        self.core.clear().await
    }

    pub fn contains_cache_id(&self, id: &CacheId) -> bool {
        self.core.contains_cache_id(id)
    }

    pub fn cache_ids(&self) -> Vec<CacheId> {
        self.core.cache_ids()
    }

    pub fn ids_by_dependency(&self, dep: &CacheId) -> Vec<CacheId> {
        self.core.ids_by_dependency(dep)
    }

    pub fn ids_by_template(&self, template: &str) -> Vec<CacheId> {
        self.core.ids_by_template(template)
    }

    pub fn push_pull_table_size(&self) -> usize {
        self.core.push_pull_table_size()
    }

    pub fn ids_in_push_pull_table(&self) -> Vec<CacheId> {
        self.core.ids_in_push_pull_table()
    }

    pub fn has_push_pull_entries(&self) -> bool {
        self.core.has_push_pull_entries()
    }

    pub fn should_pull(&self, sharing: Sharing, id: &CacheId) -> bool {
        self.core.should_pull(sharing, id)
    }

    pub fn store(&self) -> &EntryStore {
        self.core.store()
    }

    pub fn disk(&self) -> Option<&Arc<DiskTier>> {
        self.core.disk()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        self.core.statistics()
    }

    pub fn config(&self) -> &CacheConfig {
        self.core.config()
    }

    pub fn add_invalidation_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.core.listeners().add_invalidation_listener(listener);
    }

    pub fn remove_invalidation_listener(&self, listener: &Arc<dyn InvalidationListener>) {
        self.core.listeners().remove_invalidation_listener(listener);
    }

    pub fn add_pre_invalidation_listener(&self, listener: Arc<dyn PreInvalidationListener>) {
        self.core.listeners().add_pre_invalidation_listener(listener);
    }

    pub fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.core.listeners().add_change_listener(listener);
    }
}

// =============================================================================
// Tests
// =============================================================================
