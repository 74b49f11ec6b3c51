//! Entry Store - Memory Tier
//!
//! In-memory mapping from cache id to entry, owning the LRU order.
//!
//! # Design
//!
//! - Map and LRU order live under a single lock: a touch-on-read reseats the
//!   entry in the recency order atomically, so touches are never lost to a
//!   concurrent eviction.
//! - Recency is a monotonic sequence number; the LRU order is a `BTreeMap`
//!   keyed by sequence, so pop-least-recent is the first entry and a touch is
//!   a remove + reinsert at the current sequence.
//! - Size-in-bytes accounting is a separate atomic so threshold checks never
//!   take the lock.
//! - Entry priority grants extra trips through the LRU clock: a priority-N
//!   entry is reseated (not evicted) the first N times it reaches the
//!   least-recent position.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::CacheEntry;
use crate::key::CacheId;

struct StoredEntry {
    entry: Arc<CacheEntry>,
    /// Recency sequence; also the key of this entry in the LRU order
    seq: u64,
    /// Remaining LRU-clock trips granted by priority
    lives: u32,
}

#[derive(Default)]
struct StoreInner {
    map: HashMap<CacheId, StoredEntry>,
    lru: BTreeMap<u64, CacheId>,
    next_seq: u64,
}

impl StoreInner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn touch(&mut self, id: &CacheId) {
        let seq = self.next_seq();
        if let Some(stored) = self.map.get_mut(id) {
            self.lru.remove(&stored.seq);
            stored.seq = seq;
            self.lru.insert(seq, id.clone());
        }
    }
}

/// Memory tier: id -> entry map plus LRU order
pub struct EntryStore {
    inner: Mutex<StoreInner>,
    size_in_bytes: AtomicU64,
}

impl EntryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            size_in_bytes: AtomicU64::new(0),
        }
    }

    /// Get an entry, touching the LRU order on hit
    pub fn get(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();
        let entry = inner.map.get(id).map(|s| Arc::clone(&s.entry))?;
        inner.touch(id);
        entry.record_access();
        Some(entry)
    }

    /// Get an entry without touching the LRU order or access counters
    pub fn peek(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        let inner = self.inner.lock();
        inner.map.get(id).map(|s| Arc::clone(&s.entry))
    }

    /// Insert or replace an entry, returning the previous one if present
    pub fn insert(&self, entry: CacheEntry) -> Option<Arc<CacheEntry>> {
        let id = entry.id.clone();
        let size = entry.size_in_bytes();
        let lives = entry.priority.unwrap_or(0).max(0) as u32;
        let entry = Arc::new(entry);

        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        inner.lru.insert(seq, id.clone());
        let previous = inner.map.insert(id, StoredEntry { entry, seq, lives });

        let previous = previous.map(|old| {
            inner.lru.remove(&old.seq);
            old.entry
        });
        drop(inner);

        self.size_in_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = &previous {
            self.size_in_bytes
                .fetch_sub(old.size_in_bytes(), Ordering::Relaxed);
        }
        previous
    }

    /// Replace an entry's payload in place, preserving its recency position
    /// and access history. Returns the refreshed entry, or None if the id is
    /// not resident.
    pub fn refresh(
        &self,
        id: &CacheId,
        value: bytes::Bytes,
        expiration: Option<u64>,
    ) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();
        let stored = inner.map.get_mut(id)?;
        let old_size = stored.entry.size_in_bytes();
        let refreshed = Arc::new(stored.entry.refreshed(value, expiration));
        let new_size = refreshed.size_in_bytes();
        stored.entry = Arc::clone(&refreshed);
        drop(inner);

        self.size_in_bytes.fetch_add(new_size, Ordering::Relaxed);
        self.size_in_bytes.fetch_sub(old_size, Ordering::Relaxed);
        Some(refreshed)
    }

    /// Remove an entry, returning it if present
    pub fn remove(&self, id: &CacheId) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();
        let stored = inner.map.remove(id)?;
        inner.lru.remove(&stored.seq);
        drop(inner);

        self.size_in_bytes
            .fetch_sub(stored.entry.size_in_bytes(), Ordering::Relaxed);
        Some(stored.entry)
    }

    /// Remove and return the least-recently-used entry, honoring priority:
    /// an entry with remaining lives is reseated at the most-recent position
    /// instead of evicted.
    pub fn pop_lru(&self) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();
        loop {
            let (&seq, id) = inner.lru.iter().next()?;
            let id = id.clone();

            let lives = inner.map.get(&id).map(|s| s.lives);
            match lives {
                Some(lives) if lives > 0 => {
                    // Spend one life and move to the most-recent position
                    let new_seq = inner.next_seq();
                    if let Some(stored) = inner.map.get_mut(&id) {
                        stored.lives -= 1;
                        stored.seq = new_seq;
                    }
                    inner.lru.remove(&seq);
                    inner.lru.insert(new_seq, id);
                }
                Some(_) => {
                    inner.lru.remove(&seq);
                    let stored = inner.map.remove(&id)?;
                    drop(inner);
                    self.size_in_bytes
                        .fetch_sub(stored.entry.size_in_bytes(), Ordering::Relaxed);
                    return Some(stored.entry);
                }
                None => {
                    // Stale LRU slot; heal and continue
                    inner.lru.remove(&seq);
                }
            }
        }
    }

    /// Check whether an id is resident
    pub fn contains(&self, id: &CacheId) -> bool {
        self.inner.lock().map.contains_key(id)
    }

    /// Snapshot of all resident ids
    pub fn ids(&self) -> Vec<CacheId> {
        self.inner.lock().map.keys().cloned().collect()
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Current payload size in bytes
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes.load(Ordering::Relaxed)
    }

    /// Drop all entries
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.lru.clear();
        drop(inner);
        self.size_in_bytes.store(0, Ordering::Relaxed);
    }

    /// Diagnostic: every resident id appears exactly once in the LRU order,
    /// and every LRU slot points at a resident id.
    pub fn lru_order_consistent(&self) -> bool {
        let inner = self.inner.lock();
        if inner.map.len() != inner.lru.len() {
            return false;
        }
        inner.map.iter().all(|(id, stored)| {
            inner
                .lru
                .get(&stored.seq)
                .map(|lru_id| lru_id == id)
                .unwrap_or(false)
        })
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
