//! Background Daemons
//!
//! Three daemons run per cache instance, each on its own tokio task:
//!
//! - **Time limit daemon**: sleeps until the nearest registered deadline,
//!   then invalidates the entries whose effective deadline has passed.
//!   Inactivity-windowed entries touched since registration are rescheduled
//!   rather than invalidated. Also runs the disk tier's periodic
//!   expired-entry scan.
//! - **Batch update daemon**: wakes on a fixed interval and drains the
//!   pending-event queues to the external cache adapter and replication
//!   peers. A failed batch is requeued up to the configured retry limit.
//! - **Invalidation audit daemon**: verifies that recently applied
//!   invalidations are actually gone from both tiers and reports any
//!   survivor. Reporting only; it never mutates cache state.
//!
//! All three share one shutdown signal; each daemon finishes its current
//! cycle before exiting, and per-cycle errors never kill the task.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cache::CacheCore;
use crate::entry::now_millis;
use crate::invalidation::{InvalidationCause, InvalidationEvent, InvalidationSource};
use crate::key::CacheId;

/// Time limit daemon idle wait when no deadline is registered
const IDLE_WAIT: Duration = Duration::from_secs(5);

/// Audit daemon wake interval
const AUDIT_INTERVAL: Duration = Duration::from_secs(30);

/// Interval of the disk tier's expired-entry scan
const DISK_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum invalidations retained for auditing between wakeups
const AUDIT_LOG_CAP: usize = 10_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Shared shutdown signal for all daemons of one cache instance
#[derive(Debug, Default)]
pub(crate) struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn signal(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Completes once `signal()` has been called, even if the signal raced
    /// with a daemon that was mid-cycle rather than parked here.
    async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_signalled() {
            return;
        }
        notified.await;
    }
}

/// Daemon task handles, joined on `stop()`
pub(crate) struct DaemonSet {
    pub(crate) shutdown: Arc<Shutdown>,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

// =============================================================================
// Deadline registry
// =============================================================================

/// Deadlines the time limit daemon watches, ordered nearest first.
///
/// Re-registering an id displaces its previous deadline. The daemon is woken
/// whenever a newly registered deadline becomes the nearest one.
#[derive(Debug, Default)]
pub struct DeadlineRegistry {
    inner: Mutex<DeadlineInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct DeadlineInner {
    /// (deadline millis, seq) -> id; seq disambiguates equal deadlines
    queue: BTreeMap<(u64, u64), CacheId>,
    by_id: HashMap<CacheId, (u64, u64)>,
    next_seq: u64,
}

impl DeadlineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or displace) an id's deadline
    pub fn register(&self, id: CacheId, deadline: u64) {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let key = (deadline, inner.next_seq);

        if let Some(old) = inner.by_id.insert(id.clone(), key) {
            inner.queue.remove(&old);
        }
        let was_nearest = inner
            .queue
            .keys()
            .next()
            .map(|&(d, _)| deadline < d)
            .unwrap_or(true);
        inner.queue.insert(key, id);
        drop(inner);

        // notify_one stores a permit, so a registration that races with the
        // daemon between sleeps is picked up on its next wait
        if was_nearest {
            self.notify.notify_one();
        }
    }

    /// Drop an id's deadline
    pub fn cancel(&self, id: &CacheId) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.by_id.remove(id) {
            inner.queue.remove(&key);
        }
    }

    /// Nearest registered deadline (epoch millis)
    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.lock().queue.keys().next().map(|&(d, _)| d)
    }

    /// Remove and return every id whose deadline is at or before `now`
    pub fn take_due(&self, now: u64) -> Vec<CacheId> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        while let Some((&key, _)) = inner.queue.iter().next() {
            if key.0 > now {
                break;
            }
            if let Some(id) = inner.queue.remove(&key) {
                inner.by_id.remove(&id);
                due.push(id);
            }
        }
        due
    }

    /// Number of registered deadlines
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }

    /// Drop all deadlines
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.by_id.clear();
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

// =============================================================================
// Audit log
// =============================================================================

/// Recently applied id invalidations, drained by the audit daemon.
///
/// Bounded: under sustained invalidation load older records are dropped
/// first, trading audit completeness for memory.
#[derive(Debug, Default)]
pub(crate) struct AuditLog {
    inner: Mutex<VecDeque<CacheId>>,
}

impl AuditLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, id: CacheId) {
        let mut inner = self.inner.lock();
        if inner.len() >= AUDIT_LOG_CAP {
            inner.pop_front();
        }
        inner.push_back(id);
    }

    pub(crate) fn drain(&self) -> Vec<CacheId> {
        self.inner.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

// =============================================================================
// Time limit daemon
// =============================================================================

pub(crate) struct TimeLimitDaemon;

impl TimeLimitDaemon {
    #[instrument(skip_all, fields(cache = %core.config().cache_name))]
    pub(crate) async fn run(core: Arc<CacheCore>, shutdown: Arc<Shutdown>) {
        debug!("time limit daemon started");
        let mut disk_scan = tokio::time::interval(DISK_SCAN_INTERVAL);
        disk_scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip the initial tick
        disk_scan.tick().await;

        while !shutdown.is_signalled() {
            let sleep_for = match core.deadlines().next_deadline() {
                Some(deadline) => Duration::from_millis(deadline.saturating_sub(now_millis())),
                None => IDLE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = core.deadlines().changed() => continue,
                _ = disk_scan.tick() => {
                    Self::scan_disk(&core).await;
                    continue;
                }
                _ = shutdown.wait() => break,
            }

            Self::expire_due(&core).await;
        }
        debug!("time limit daemon stopped");
    }

    /// Drop expired on-disk entries and clear their registrations
    pub(crate) async fn scan_disk(core: &Arc<CacheCore>) {
        if let Some(disk) = core.disk() {
            let evicted = disk.cleanup(true).await;
            core.absorb_disk_evictions(evicted).await;
        }
    }

    async fn expire_due(core: &Arc<CacheCore>) {
        let now = now_millis();
        for id in core.deadlines().take_due(now) {
            // A touch since registration may have pushed the inactivity
            // deadline out; reschedule instead of invalidating.
            if let Some(entry) = core.store().peek(&id) {
                match entry.effective_deadline() {
                    Some(deadline) if deadline > now => {
                        core.deadlines().register(id, deadline);
                        continue;
                    }
                    None => continue,
                    Some(_) => {}
                }
            }
            core.invalidate_by_id(
                &id,
                InvalidationCause::Timeout,
                InvalidationSource::Local,
                true,
            )
            .await;
        }
    }
}

// =============================================================================
// Batch update daemon
// =============================================================================

pub(crate) struct BatchUpdateDaemon;

impl BatchUpdateDaemon {
    #[instrument(skip_all, fields(cache = %core.config().cache_name))]
    pub(crate) async fn run(core: Arc<CacheCore>, shutdown: Arc<Shutdown>) {
        debug!("batch update daemon started");
        let mut ticker = tokio::time::interval(core.config().batch_update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            deliver_pending(&core).await;
        }
        // Final best-effort drain so a clean stop loses nothing queued
        deliver_pending(&core).await;
        debug!("batch update daemon stopped");
    }
}

/// Drain and deliver all pending event batches once. Failed batches are
/// requeued with their attempt count bumped; batches past the retry limit
/// are dropped and counted.
pub(crate) async fn deliver_pending(core: &CacheCore) {
    let max_retries = core.config().max_event_retries;

    for mut batch in core.pending_events().drain() {
        let events = batch.len() as u64;
        let mut delivered = true;

        if let Err(error) = core
            .external()
            .batch_update(
                &batch.invalidate_ids,
                &batch.invalidate_templates,
                &batch.push_entries,
            )
            .await
        {
            warn!(%error, events, "external batch update failed");
            delivered = false;
        }

        if delivered && core.replication_enabled() {
            let notifications: Vec<InvalidationEvent> = batch
                .invalidate_ids
                .iter()
                .map(|(id, &cause)| {
                    InvalidationEvent::for_id(id.clone(), cause, InvalidationSource::Local)
                })
                .chain(batch.invalidate_templates.iter().map(|template| {
                    InvalidationEvent::for_template(
                        template.clone(),
                        InvalidationCause::Template,
                        InvalidationSource::Local,
                    )
                }))
                .collect();

            if !notifications.is_empty() {
                if let Err(error) = core.remote().batch_notify(&notifications).await {
                    warn!(%error, events, "replication batch notify failed");
                    delivered = false;
                }
            }
            if delivered {
                for push in &batch.push_entries {
                    if let Err(error) = core.remote().push(&push.id, push.value.clone()).await {
                        warn!(%error, id = %push.id, "replication push failed");
                        delivered = false;
                        break;
                    }
                }
            }
        }

        if delivered {
            core.statistics().record_events_delivered(events);
        } else {
            batch.attempts += 1;
            if batch.attempts > max_retries {
                warn!(
                    events,
                    attempts = batch.attempts,
                    "dropping event batch past retry limit"
                );
                core.statistics().record_events_dropped(events);
            } else {
                core.pending_events().requeue(batch);
            }
        }
    }
}

// =============================================================================
// Invalidation audit daemon
// =============================================================================

pub(crate) struct InvalidationAuditDaemon;

impl InvalidationAuditDaemon {
    #[instrument(skip_all, fields(cache = %core.config().cache_name))]
    pub(crate) async fn run(core: Arc<CacheCore>, shutdown: Arc<Shutdown>) {
        debug!("invalidation audit daemon started");
        let mut ticker = tokio::time::interval(AUDIT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip the initial tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            Self::audit(&core);
        }
        debug!("invalidation audit daemon stopped");
    }

    /// Check recently applied invalidations against both tiers and report
    /// survivors. Reporting only; repair belongs to the invalidation paths
    /// that own the state. Returns the survivor count.
    pub(crate) fn audit(core: &CacheCore) -> usize {
        let mut survivors = 0usize;
        for id in core.audit_log().drain() {
            let in_memory = core.store().contains(&id);
            let on_disk = core.disk().map(|d| d.contains(&id)).unwrap_or(false);
            if in_memory || on_disk {
                survivors += 1;
                warn!(%id, in_memory, on_disk, "invalidated entry still resident");
            }
        }
        if survivors > 0 {
            warn!(survivors, "invalidation audit found resident entries");
        }
        survivors
    }
}

// =============================================================================
// Tests
// =============================================================================
