//! External Cache Coordination
//!
//! Edge caches and other out-of-process consumers receive invalidations and
//! pushed entries in batches rather than inline with cache mutations. This
//! module holds the adapter trait plus the pending-event queues the batch
//! update daemon drains.
//!
//! # Design
//!
//! Delivery is at-least-once: a failed batch is requeued and retried up to
//! `max_event_retries` attempts, after which the events are dropped and
//! logged. Receivers must treat duplicate notifications as idempotent.
//! Within one drain cycle, invalidations are delivered before pushes so a
//! consumer never applies a push for an id it has not yet invalidated.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::Result;
use crate::invalidation::InvalidationCause;
use crate::key::CacheId;

/// Adapter to an out-of-process cache consumer (e.g. an edge cache)
#[async_trait]
pub trait ExternalCacheServices: Send + Sync {
    /// Deliver one batch of invalidations and pushed entries. The whole
    /// batch succeeds or fails as a unit; a failure requeues everything.
    async fn batch_update(
        &self,
        invalidate_ids: &HashMap<CacheId, InvalidationCause>,
        invalidate_templates: &[String],
        push_entries: &[PushEvent],
    ) -> Result<()>;
}

/// No-op adapter for caches with no external consumers
#[derive(Debug, Default)]
pub struct NoopExternalCacheServices;

#[async_trait]
impl ExternalCacheServices for NoopExternalCacheServices {
    async fn batch_update(
        &self,
        _invalidate_ids: &HashMap<CacheId, InvalidationCause>,
        _invalidate_templates: &[String],
        _push_entries: &[PushEvent],
    ) -> Result<()> {
        Ok(())
    }
}

/// A pushed entry payload bound for external consumers
#[derive(Debug, Clone)]
pub struct PushEvent {
    /// Id the payload is stored under
    pub id: CacheId,
    /// Entry payload
    pub value: Bytes,
    /// When the push was enqueued (epoch millis)
    pub timestamp: u64,
}

/// One drained batch plus its delivery attempt count
#[derive(Debug, Default)]
pub struct EventBatch {
    /// id -> most severe cause recorded for it this cycle
    pub invalidate_ids: HashMap<CacheId, InvalidationCause>,
    /// template groups invalidated this cycle
    pub invalidate_templates: Vec<String>,
    /// pushed payloads, oldest first
    pub push_entries: Vec<PushEvent>,
    /// delivery attempts already made for this batch
    pub attempts: u32,
}

impl EventBatch {
    /// Whether there is anything to deliver
    pub fn is_empty(&self) -> bool {
        self.invalidate_ids.is_empty()
            && self.invalidate_templates.is_empty()
            && self.push_entries.is_empty()
    }

    /// Total number of events carried
    pub fn len(&self) -> usize {
        self.invalidate_ids.len() + self.invalidate_templates.len() + self.push_entries.len()
    }
}

/// Pending events accumulated between batch daemon wakeups.
///
/// Coalescing: re-invalidating an id before the next drain overwrites its
/// cause rather than queueing a duplicate. Pushes are not coalesced; each
/// push carries a distinct payload.
#[derive(Debug, Default)]
pub struct PendingEvents {
    inner: Mutex<PendingInner>,
}

#[derive(Debug, Default)]
struct PendingInner {
    invalidate_ids: HashMap<CacheId, InvalidationCause>,
    invalidate_templates: Vec<String>,
    push_entries: Vec<PushEvent>,
    /// failed batches awaiting redelivery, oldest first
    retry: Vec<EventBatch>,
}

impl PendingEvents {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an id invalidation for the next drain
    pub fn queue_invalidation(&self, id: CacheId, cause: InvalidationCause) {
        self.inner.lock().invalidate_ids.insert(id, cause);
    }

    /// Queue a template invalidation for the next drain
    pub fn queue_template_invalidation(&self, template: String) {
        let mut inner = self.inner.lock();
        if !inner.invalidate_templates.contains(&template) {
            inner.invalidate_templates.push(template);
        }
    }

    /// Queue a pushed payload for the next drain
    pub fn queue_push(&self, event: PushEvent) {
        self.inner.lock().push_entries.push(event);
    }

    /// Requeue a batch that failed delivery; the daemon retries it on the
    /// next wakeup with its attempt count carried forward.
    pub fn requeue(&self, batch: EventBatch) {
        self.inner.lock().retry.push(batch);
    }

    /// Drain everything pending into delivery batches: retries first
    /// (oldest first), then one batch of freshly queued events.
    pub fn drain(&self) -> Vec<EventBatch> {
        let mut inner = self.inner.lock();
        let mut batches = std::mem::take(&mut inner.retry);

        let fresh = EventBatch {
            invalidate_ids: std::mem::take(&mut inner.invalidate_ids),
            invalidate_templates: std::mem::take(&mut inner.invalidate_templates),
            push_entries: std::mem::take(&mut inner.push_entries),
            attempts: 0,
        };
        if !fresh.is_empty() {
            batches.push(fresh);
        }
        batches
    }

    /// Number of freshly queued events (excludes retry batches)
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.invalidate_ids.len() + inner.invalidate_templates.len() + inner.push_entries.len()
    }

    /// Whether anything (fresh or retrying) awaits delivery
    pub fn has_pending(&self) -> bool {
        let inner = self.inner.lock();
        !inner.invalidate_ids.is_empty()
            || !inner.invalidate_templates.is_empty()
            || !inner.push_entries.is_empty()
            || !inner.retry.is_empty()
    }

    /// Drop everything, including retry batches
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.invalidate_ids.clear();
        inner.invalidate_templates.clear();
        inner.push_entries.clear();
        inner.retry.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::now_millis;

    fn push(id: &str) -> PushEvent {
        PushEvent {
            id: CacheId::uri(id),
            value: Bytes::from_static(b"payload"),
            timestamp: now_millis(),
        }
    }

    #[test]
    fn test_queue_and_drain() {
        let pending = PendingEvents::new();
        pending.queue_invalidation(CacheId::uri("/a"), InvalidationCause::Explicit);
        pending.queue_template_invalidation("t1".to_string());
        pending.queue_push(push("/b"));

        assert_eq!(pending.pending_count(), 3);

        let batches = pending.drain();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0].attempts, 0);

        // Drain leaves nothing behind
        assert!(!pending.has_pending());
        assert!(pending.drain().is_empty());
    }

    #[test]
    fn test_id_invalidations_coalesce() {
        let pending = PendingEvents::new();
        pending.queue_invalidation(CacheId::uri("/a"), InvalidationCause::Lru);
        pending.queue_invalidation(CacheId::uri("/a"), InvalidationCause::Explicit);

        let batches = pending.drain();
        assert_eq!(batches[0].invalidate_ids.len(), 1);
        assert_eq!(
            batches[0].invalidate_ids[&CacheId::uri("/a")],
            InvalidationCause::Explicit
        );
    }

    #[test]
    fn test_duplicate_templates_coalesce() {
        let pending = PendingEvents::new();
        pending.queue_template_invalidation("t1".to_string());
        pending.queue_template_invalidation("t1".to_string());

        let batches = pending.drain();
        assert_eq!(batches[0].invalidate_templates.len(), 1);
    }

    #[test]
    fn test_requeued_batch_drains_before_fresh() {
        let pending = PendingEvents::new();

        let mut failed = EventBatch::default();
        failed.invalidate_templates.push("old".to_string());
        failed.attempts = 1;
        pending.requeue(failed);

        pending.queue_template_invalidation("new".to_string());

        let batches = pending.drain();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].invalidate_templates, vec!["old".to_string()]);
        assert_eq!(batches[0].attempts, 1);
        assert_eq!(batches[1].invalidate_templates, vec!["new".to_string()]);
    }

    #[test]
    fn test_pushes_preserve_order() {
        let pending = PendingEvents::new();
        pending.queue_push(push("/first"));
        pending.queue_push(push("/second"));

        let batches = pending.drain();
        assert_eq!(batches[0].push_entries[0].id, CacheId::uri("/first"));
        assert_eq!(batches[0].push_entries[1].id, CacheId::uri("/second"));
    }

    #[tokio::test]
    async fn test_noop_external_services() {
        let services = NoopExternalCacheServices;
        let result = services.batch_update(&HashMap::new(), &[], &[]).await;
        assert!(result.is_ok());
    }
}
