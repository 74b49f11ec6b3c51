//! Listener Callbacks
//!
//! Observer registration for invalidation and change events. The registry
//! snapshots the listener list before firing, so registration during a
//! callback never trips concurrent-modification hazards. Each callback is
//! panic-isolated: one misbehaving listener is logged and skipped, and the
//! invalidation itself always completes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::entry::CacheEntry;
use crate::invalidation::InvalidationEvent;

/// Notified after an entry has been invalidated
pub trait InvalidationListener: Send + Sync {
    fn on_invalidate(&self, event: &InvalidationEvent);
}

/// Consulted before an explicit invalidation; returning false vetoes it.
/// LRU and timeout removals are never vetoed.
pub trait PreInvalidationListener: Send + Sync {
    fn should_invalidate(&self, event: &InvalidationEvent) -> bool;
}

/// Notified when an entry is inserted or refreshed
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, entry: &CacheEntry);
}

/// Listener registry with snapshot-on-fire semantics
#[derive(Default)]
pub struct ListenerRegistry {
    invalidation: RwLock<Vec<Arc<dyn InvalidationListener>>>,
    pre_invalidation: RwLock<Vec<Arc<dyn PreInvalidationListener>>>,
    change: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_invalidation_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.invalidation.write().push(listener);
    }

    /// Remove a previously registered invalidation listener (by identity)
    pub fn remove_invalidation_listener(&self, listener: &Arc<dyn InvalidationListener>) {
        self.invalidation
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_pre_invalidation_listener(&self, listener: Arc<dyn PreInvalidationListener>) {
        self.pre_invalidation.write().push(listener);
    }

    pub fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.change.write().push(listener);
    }

    /// Number of registered invalidation listeners
    pub fn invalidation_listener_count(&self) -> usize {
        self.invalidation.read().len()
    }

    /// Fire invalidation callbacks. A panicking listener is logged and
    /// skipped; the rest still fire.
    pub fn fire_invalidation(&self, event: &InvalidationEvent) {
        let snapshot: Vec<_> = self.invalidation.read().iter().cloned().collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_invalidate(event))).is_err() {
                warn!(?event.target, "invalidation listener panicked; skipping");
            }
        }
    }

    /// Ask pre-invalidation listeners whether an explicit invalidation may
    /// proceed. Any veto wins; a panicking listener does not veto.
    pub fn allows_invalidation(&self, event: &InvalidationEvent) -> bool {
        let snapshot: Vec<_> = self.pre_invalidation.read().iter().cloned().collect();
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.should_invalidate(event))) {
                Ok(false) => return false,
                Ok(true) => {}
                Err(_) => {
                    warn!(?event.target, "pre-invalidation listener panicked; ignoring");
                }
            }
        }
        true
    }

    /// Fire change callbacks for an inserted or refreshed entry
    pub fn fire_change(&self, entry: &CacheEntry) {
        let snapshot: Vec<_> = self.change.read().iter().cloned().collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_change(entry))).is_err() {
                warn!(id = %entry.id, "change listener panicked; skipping");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
