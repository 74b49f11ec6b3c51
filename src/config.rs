//! Cache Configuration
//!
//! Per-instance configuration covering the memory tier, the optional disk
//! tier, the background daemons, and replication. Validated once at
//! `start()`; an invalid configuration is fatal to that cache instance only.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default maximum number of resident memory entries
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 2000;

/// Default disk cache capacity (3GB)
pub const DEFAULT_DISK_CAPACITY: u64 = 3 * 1024 * 1024 * 1024;

/// Default batch update daemon wake interval
pub const DEFAULT_BATCH_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Eviction policy for the disk tier.
///
/// The disk tier evicts independently of the memory tier; once its high
/// threshold is crossed it evicts down to the low threshold using the
/// configured policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskEvictionPolicy {
    /// Evict least-recently-used entries first
    Lru,
    /// Evict largest entries first (frees space fastest)
    SizeBased,
}

/// Cache instance configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Name of this cache instance (appears in logs and errors)
    pub cache_name: String,
    /// Maximum number of entries resident in memory
    pub max_memory_entries: usize,
    /// Enable the disk overflow tier
    pub enable_disk_offload: bool,
    /// Directory for the file-backed disk tier
    pub disk_cache_dir: PathBuf,
    /// Disk tier capacity in bytes
    pub disk_capacity: u64,
    /// High threshold (percent of capacity) that triggers disk cleanup
    pub disk_high_threshold_percent: u8,
    /// Low threshold (percent of capacity) cleanup evicts down to
    pub disk_low_threshold_percent: u8,
    /// Disk tier eviction policy
    pub disk_eviction_policy: DiskEvictionPolicy,
    /// Batch update daemon wake interval
    pub batch_update_interval: Duration,
    /// Sleep applied to offloading writers when the disk write backlog
    /// crosses `congestion_backlog_threshold`; zero disables backpressure
    pub congestion_sleep: Duration,
    /// In-flight disk writes above which congestion sleep applies
    pub congestion_backlog_threshold: usize,
    /// Enable cross-node replication
    pub enable_cache_replication: bool,
    /// Maximum delivery attempts for a pending invalidation/push event
    /// before it is dropped and logged
    pub max_event_retries: u32,
    /// Default priority assigned to entries that do not specify one
    pub default_priority: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "baseCache".to_string(),
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
            enable_disk_offload: false,
            disk_cache_dir: PathBuf::from("/var/cache/dynacache"),
            disk_capacity: DEFAULT_DISK_CAPACITY,
            disk_high_threshold_percent: 80,
            disk_low_threshold_percent: 70,
            disk_eviction_policy: DiskEvictionPolicy::Lru,
            batch_update_interval: DEFAULT_BATCH_UPDATE_INTERVAL,
            congestion_sleep: Duration::from_millis(0),
            congestion_backlog_threshold: 64,
            enable_cache_replication: false,
            max_event_retries: 3,
            default_priority: 0,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(Error::Config("cache_name must not be empty".into()));
        }
        if self.max_memory_entries == 0 {
            return Err(Error::Config("max_memory_entries must be > 0".into()));
        }
        if self.disk_high_threshold_percent > 100 || self.disk_low_threshold_percent > 100 {
            return Err(Error::Config(
                "disk thresholds must be percentages in 0..=100".into(),
            ));
        }
        if self.disk_low_threshold_percent >= self.disk_high_threshold_percent {
            return Err(Error::Config(format!(
                "disk_low_threshold_percent ({}) must be below disk_high_threshold_percent ({})",
                self.disk_low_threshold_percent, self.disk_high_threshold_percent
            )));
        }
        if self.enable_disk_offload && self.disk_capacity == 0 {
            return Err(Error::Config(
                "disk_capacity must be > 0 when disk offload is enabled".into(),
            ));
        }
        if self.batch_update_interval.is_zero() {
            return Err(Error::Config("batch_update_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Disk size (bytes) at which cleanup triggers
    pub fn disk_high_threshold_bytes(&self) -> u64 {
        self.disk_capacity / 100 * self.disk_high_threshold_percent as u64
    }

    /// Disk size (bytes) cleanup evicts down to
    pub fn disk_low_threshold_bytes(&self) -> u64 {
        self.disk_capacity / 100 * self.disk_low_threshold_percent as u64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_entries_rejected() {
        let config = CacheConfig {
            max_memory_entries: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = CacheConfig {
            disk_high_threshold_percent: 50,
            disk_low_threshold_percent: 60,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_disk_offload_needs_capacity() {
        let config = CacheConfig {
            enable_disk_offload: true,
            disk_capacity: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_threshold_bytes() {
        let config = CacheConfig {
            disk_capacity: 1000 * 100,
            disk_high_threshold_percent: 80,
            disk_low_threshold_percent: 70,
            ..Default::default()
        };
        assert_eq!(config.disk_high_threshold_bytes(), 80_000);
        assert_eq!(config.disk_low_threshold_bytes(), 70_000);
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = CacheConfig {
            cache_name: String::new(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }
}
