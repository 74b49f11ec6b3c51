//! Cache Statistics
//!
//! Pure observational counters for monitoring cache health. Every mutating
//! cache operation records exactly one corresponding statistic; resetting
//! counters never affects cache contents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Offload size-bucket histogram boundaries (bytes).
///
/// Deliberately coarse powers-of-ten buckets (4K/40K/400K/4000K) for
/// operational visibility into what is being pushed to disk.
pub const OFFLOAD_BUCKETS: [u64; 4] = [4 * 1024, 40 * 1024, 400 * 1024, 4000 * 1024];

/// Cache statistics collector
#[derive(Debug, Default)]
pub struct CacheStatistics {
    // Memory tier
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    lru_evictions: AtomicU64,

    // Disk tier
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    disk_evictions: AtomicU64,

    // Offloads by payload size bucket
    offloads_4k: AtomicU64,
    offloads_40k: AtomicU64,
    offloads_400k: AtomicU64,
    offloads_4000k: AtomicU64,
    offloads_huge: AtomicU64,

    // Invalidations by cause
    explicit_invalidations: AtomicU64,
    timeout_invalidations: AtomicU64,
    dependency_invalidations: AtomicU64,
    template_invalidations: AtomicU64,
    remote_invalidations: AtomicU64,

    // Replication
    remote_fetches: AtomicU64,
    remote_updates: AtomicU64,

    // Batch delivery
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,

    // Latency (exponential moving average, microseconds)
    disk_read_latency_us: AtomicU64,
    disk_write_latency_us: AtomicU64,
}

impl CacheStatistics {
    /// Create a new statistics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Memory tier
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lru_eviction(&self) {
        self.lru_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    pub fn lru_evictions(&self) -> u64 {
        self.lru_evictions.load(Ordering::Relaxed)
    }

    pub fn memory_hit_ratio(&self) -> f64 {
        let hits = self.memory_hits() as f64;
        let total = hits + self.memory_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    // Disk tier
    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_eviction(&self) {
        self.disk_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn disk_misses(&self) -> u64 {
        self.disk_misses.load(Ordering::Relaxed)
    }

    pub fn disk_evictions(&self) -> u64 {
        self.disk_evictions.load(Ordering::Relaxed)
    }

    /// Record an offload into the size-bucket histogram
    pub fn record_offload(&self, size_bytes: u64) {
        let bucket = if size_bytes <= OFFLOAD_BUCKETS[0] {
            &self.offloads_4k
        } else if size_bytes <= OFFLOAD_BUCKETS[1] {
            &self.offloads_40k
        } else if size_bytes <= OFFLOAD_BUCKETS[2] {
            &self.offloads_400k
        } else if size_bytes <= OFFLOAD_BUCKETS[3] {
            &self.offloads_4000k
        } else {
            &self.offloads_huge
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_offloads(&self) -> u64 {
        self.offloads_4k.load(Ordering::Relaxed)
            + self.offloads_40k.load(Ordering::Relaxed)
            + self.offloads_400k.load(Ordering::Relaxed)
            + self.offloads_4000k.load(Ordering::Relaxed)
            + self.offloads_huge.load(Ordering::Relaxed)
    }

    // Invalidations
    pub fn record_explicit_invalidation(&self) {
        self.explicit_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_invalidation(&self) {
        self.timeout_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dependency_invalidation(&self) {
        self.dependency_invalidations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_template_invalidation(&self) {
        self.template_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_invalidation(&self) {
        self.remote_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn explicit_invalidations(&self) -> u64 {
        self.explicit_invalidations.load(Ordering::Relaxed)
    }

    pub fn timeout_invalidations(&self) -> u64 {
        self.timeout_invalidations.load(Ordering::Relaxed)
    }

    pub fn dependency_invalidations(&self) -> u64 {
        self.dependency_invalidations.load(Ordering::Relaxed)
    }

    pub fn template_invalidations(&self) -> u64 {
        self.template_invalidations.load(Ordering::Relaxed)
    }

    // Replication
    pub fn record_remote_fetch(&self) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_update(&self) {
        self.remote_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_fetches(&self) -> u64 {
        self.remote_fetches.load(Ordering::Relaxed)
    }

    pub fn remote_updates(&self) -> u64 {
        self.remote_updates.load(Ordering::Relaxed)
    }

    // Batch delivery
    pub fn record_events_delivered(&self, count: u64) {
        self.events_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_events_dropped(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    // Latency tracking
    pub fn record_disk_read_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.disk_read_latency_us, duration);
    }

    pub fn record_disk_write_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.disk_write_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn disk_read_latency(&self) -> Duration {
        Duration::from_micros(self.disk_read_latency_us.load(Ordering::Relaxed))
    }

    pub fn disk_write_latency(&self) -> Duration {
        Duration::from_micros(self.disk_write_latency_us.load(Ordering::Relaxed))
    }

    /// Zero the memory-tier counters
    pub fn reset_memory(&self) {
        self.memory_hits.store(0, Ordering::Relaxed);
        self.memory_misses.store(0, Ordering::Relaxed);
        self.lru_evictions.store(0, Ordering::Relaxed);
    }

    /// Zero the disk-tier counters
    pub fn reset_disk(&self) {
        self.disk_hits.store(0, Ordering::Relaxed);
        self.disk_misses.store(0, Ordering::Relaxed);
        self.disk_evictions.store(0, Ordering::Relaxed);
        self.offloads_4k.store(0, Ordering::Relaxed);
        self.offloads_40k.store(0, Ordering::Relaxed);
        self.offloads_400k.store(0, Ordering::Relaxed);
        self.offloads_4000k.store(0, Ordering::Relaxed);
        self.offloads_huge.store(0, Ordering::Relaxed);
        self.disk_read_latency_us.store(0, Ordering::Relaxed);
        self.disk_write_latency_us.store(0, Ordering::Relaxed);
    }

    /// Zero all counters
    pub fn reset(&self) {
        self.reset_memory();
        self.reset_disk();
        self.explicit_invalidations.store(0, Ordering::Relaxed);
        self.timeout_invalidations.store(0, Ordering::Relaxed);
        self.dependency_invalidations.store(0, Ordering::Relaxed);
        self.template_invalidations.store(0, Ordering::Relaxed);
        self.remote_invalidations.store(0, Ordering::Relaxed);
        self.remote_fetches.store(0, Ordering::Relaxed);
        self.remote_updates.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            memory_hits: self.memory_hits(),
            memory_misses: self.memory_misses(),
            memory_hit_ratio: self.memory_hit_ratio(),
            lru_evictions: self.lru_evictions(),
            disk_hits: self.disk_hits(),
            disk_misses: self.disk_misses(),
            disk_evictions: self.disk_evictions(),
            offloads_4k: self.offloads_4k.load(Ordering::Relaxed),
            offloads_40k: self.offloads_40k.load(Ordering::Relaxed),
            offloads_400k: self.offloads_400k.load(Ordering::Relaxed),
            offloads_4000k: self.offloads_4000k.load(Ordering::Relaxed),
            offloads_huge: self.offloads_huge.load(Ordering::Relaxed),
            explicit_invalidations: self.explicit_invalidations(),
            timeout_invalidations: self.timeout_invalidations(),
            dependency_invalidations: self.dependency_invalidations(),
            template_invalidations: self.template_invalidations(),
            remote_invalidations: self.remote_invalidations.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches(),
            remote_updates: self.remote_updates(),
            events_delivered: self.events_delivered(),
            events_dropped: self.events_dropped(),
            disk_read_latency: self.disk_read_latency(),
            disk_write_latency: self.disk_write_latency(),
        }
    }
}

/// Snapshot of all cache statistics
#[derive(Debug, Clone)]
pub struct StatisticsSnapshot {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_hit_ratio: f64,
    pub lru_evictions: u64,

    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_evictions: u64,

    pub offloads_4k: u64,
    pub offloads_40k: u64,
    pub offloads_400k: u64,
    pub offloads_4000k: u64,
    pub offloads_huge: u64,

    pub explicit_invalidations: u64,
    pub timeout_invalidations: u64,
    pub dependency_invalidations: u64,
    pub template_invalidations: u64,
    pub remote_invalidations: u64,

    pub remote_fetches: u64,
    pub remote_updates: u64,

    pub events_delivered: u64,
    pub events_dropped: u64,

    pub disk_read_latency: Duration,
    pub disk_write_latency: Duration,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_tracking() {
        let stats = CacheStatistics::new();

        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_memory_miss();

        assert_eq!(stats.memory_hits(), 2);
        assert_eq!(stats.memory_misses(), 1);
        assert!((stats.memory_hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_offload_bucketing() {
        let stats = CacheStatistics::new();

        stats.record_offload(1024); // 4K bucket
        stats.record_offload(30 * 1024); // 40K bucket
        stats.record_offload(300 * 1024); // 400K bucket
        stats.record_offload(3000 * 1024); // 4000K bucket
        stats.record_offload(10_000 * 1024); // beyond the last boundary

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.offloads_4k, 1);
        assert_eq!(snapshot.offloads_40k, 1);
        assert_eq!(snapshot.offloads_400k, 1);
        assert_eq!(snapshot.offloads_4000k, 1);
        assert_eq!(snapshot.offloads_huge, 1);
        assert_eq!(stats.total_offloads(), 5);
    }

    #[test]
    fn test_bucket_boundaries_inclusive() {
        let stats = CacheStatistics::new();
        stats.record_offload(4 * 1024);
        assert_eq!(stats.snapshot().offloads_4k, 1);
        stats.record_offload(4 * 1024 + 1);
        assert_eq!(stats.snapshot().offloads_40k, 1);
    }

    #[test]
    fn test_reset_memory_leaves_disk() {
        let stats = CacheStatistics::new();
        stats.record_memory_hit();
        stats.record_disk_hit();

        stats.reset_memory();

        assert_eq!(stats.memory_hits(), 0);
        assert_eq!(stats.disk_hits(), 1);
    }

    #[test]
    fn test_reset_disk_leaves_memory() {
        let stats = CacheStatistics::new();
        stats.record_memory_hit();
        stats.record_disk_hit();
        stats.record_offload(100);

        stats.reset_disk();

        assert_eq!(stats.memory_hits(), 1);
        assert_eq!(stats.disk_hits(), 0);
        assert_eq!(stats.total_offloads(), 0);
    }

    #[test]
    fn test_full_reset() {
        let stats = CacheStatistics::new();
        stats.record_memory_hit();
        stats.record_explicit_invalidation();
        stats.record_remote_fetch();
        stats.record_events_delivered(5);

        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.memory_hits, 0);
        assert_eq!(snapshot.explicit_invalidations, 0);
        assert_eq!(snapshot.remote_fetches, 0);
        assert_eq!(snapshot.events_delivered, 0);
    }

    #[test]
    fn test_latency_ema() {
        let stats = CacheStatistics::new();

        stats.record_disk_read_latency(Duration::from_micros(100));
        assert_eq!(stats.disk_read_latency(), Duration::from_micros(100));

        stats.record_disk_read_latency(Duration::from_micros(200));
        let latency = stats.disk_read_latency().as_micros();
        assert!(latency > 100 && latency < 200);
    }
}
