//! DynaCache - Multi-Tier Dynamic Object Cache
//!
//! An in-process object cache with an LRU-ordered memory tier, an optional
//! disk overflow tier, dependency-id and template invalidation cascades, and
//! push-pull coordination for clustered deployments.
//!
//! # Architecture
//!
//! ```text
//! DynaCache (facade)
//!   ├── EntryStore (memory tier, LRU)
//!   ├── DiskTier (overflow, pluggable backend)
//!   ├── InvalidationIndexes (dependency + template cascades)
//!   ├── PushPullCoordinator (cluster sharing table)
//!   └── daemons: time limit / batch update / invalidation audit
//! ```
//!
//! Entries carry metadata (priority, dependency ids, templates, expiration,
//! sharing mode) that drives eviction ordering, timed invalidation, and
//! replication. Invalidations and pushed entries are batched and delivered
//! asynchronously to external caches and cluster peers.
//!
//! # Modules
//!
//! - [`cache`] - Engine core and the `DynaCache` facade
//! - [`config`] - Per-instance configuration
//! - [`daemons`] - Background daemons and the deadline registry
//! - [`disk`] - Disk overflow tier and storage backends
//! - [`entry`] - Cache entry types and metadata
//! - [`error`] - Error types
//! - [`external`] - External cache adapter and pending-event queues
//! - [`invalidation`] - Invalidation events and cascade indexes
//! - [`key`] - Cache id types and hashing
//! - [`listeners`] - Invalidation/change observer callbacks
//! - [`replication`] - Push-pull coordination and the cluster transport seam
//! - [`stats`] - Statistics counters
//! - [`store`] - Memory tier with LRU ordering

pub mod cache;
pub mod config;
pub mod daemons;
pub mod disk;
pub mod entry;
pub mod error;
pub mod external;
pub mod invalidation;
pub mod key;
pub mod listeners;
pub mod replication;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheCore, DynaCache, FreeLruEntryResult};
pub use config::{CacheConfig, DiskEvictionPolicy};
pub use entry::{CacheEntry, EntrySource, Sharing};
pub use error::{Error, Result};
pub use external::{ExternalCacheServices, NoopExternalCacheServices, PushEvent};
pub use invalidation::{
    InvalidationCause, InvalidationEvent, InvalidationSource, InvalidationTarget,
};
pub use key::CacheId;
pub use listeners::{ChangeListener, InvalidationListener, PreInvalidationListener};
pub use replication::{NoopRemoteServices, RemoteServices};
pub use stats::{CacheStatistics, StatisticsSnapshot};
