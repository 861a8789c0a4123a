//! In-memory queue mirroring the Postgres semantics.
//!
//! Used by tests and single-box runs. Every operation takes the one map
//! lock briefly and never holds it across an await point.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{NewQueueItem, QueueItemStatus, UrlQueueItem};
use crate::queue::{DEFAULT_LEASE_TIMEOUT, UrlQueue};

struct Entry {
    item: UrlQueueItem,
    /// Insertion order; tie-breaker under equal priority and created_at
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, Entry>,
    /// `(execution_id, url_hash)` -> row id
    by_hash: HashMap<(Uuid, String), Uuid>,
    next_seq: u64,
}

pub struct MemoryUrlQueue {
    inner: Mutex<Inner>,
    lease_timeout: Duration,
}

impl Default for MemoryUrlQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUrlQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease_timeout(DEFAULT_LEASE_TIMEOUT)
    }

    /// Tests shorten the lease to exercise reclamation without waiting
    #[must_use]
    pub fn with_lease_timeout(lease_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease_timeout,
        }
    }

    fn enqueue_locked(inner: &mut Inner, item: &NewQueueItem) -> bool {
        let key = (item.execution_id, item.url_hash.clone());
        if let Some(existing_id) = inner.by_hash.get(&key) {
            let entry = inner
                .entries
                .get_mut(existing_id)
                .expect("by_hash index points at a live entry");
            // Conflict: lift priority, resurrect failed rows, keep the
            // first discovery's lineage fields
            entry.item.priority = entry.item.priority.max(item.priority);
            if entry.item.status == QueueItemStatus::Failed {
                entry.item.status = QueueItemStatus::Pending;
            }
            return false;
        }

        let id = Uuid::new_v4();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id,
            Entry {
                item: UrlQueueItem {
                    id,
                    execution_id: item.execution_id,
                    url: item.url.clone(),
                    url_hash: item.url_hash.clone(),
                    depth: item.depth,
                    priority: item.priority,
                    status: QueueItemStatus::Pending,
                    parent_url_id: item.parent_url_id,
                    discovered_by_node: item.discovered_by_node.clone(),
                    marker: item.marker.clone(),
                    phase_id: item.phase_id.clone(),
                    retry_count: 0,
                    last_error: None,
                    skip_reason: None,
                    created_at: Utc::now(),
                    processed_at: None,
                    lease_held_at: None,
                    lease_held_by: None,
                    metadata: item.metadata.clone(),
                },
                seq,
            },
        );
        inner.by_hash.insert(key, id);
        true
    }

    /// All rows of one execution (test observability)
    #[must_use]
    pub fn snapshot(&self, execution_id: Uuid) -> Vec<UrlQueueItem> {
        let inner = self.inner.lock();
        let mut rows: Vec<UrlQueueItem> = inner
            .entries
            .values()
            .filter(|e| e.item.execution_id == execution_id)
            .map(|e| e.item.clone())
            .collect();
        rows.sort_by_key(|item| item.created_at);
        rows
    }

    /// Lease-guarded lookup shared by the mark_* operations
    fn holder_entry<'a>(
        inner: &'a mut Inner,
        id: Uuid,
        worker_id: &str,
        idempotent_status: Option<QueueItemStatus>,
    ) -> CrawlResult<Option<&'a mut Entry>> {
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(CrawlError::LeaseLost(id))?;

        if entry.item.status == QueueItemStatus::Processing
            && entry.item.lease_held_by.as_deref() == Some(worker_id)
        {
            return Ok(Some(entry));
        }
        // Second call after a terminal transition by the same holder: no-op
        if let Some(status) = idempotent_status
            && entry.item.status == status
            && entry.item.lease_held_by.as_deref() == Some(worker_id)
        {
            return Ok(None);
        }
        Err(CrawlError::LeaseLost(id))
    }
}

#[async_trait]
impl UrlQueue for MemoryUrlQueue {
    async fn enqueue(&self, item: &NewQueueItem) -> CrawlResult<bool> {
        let mut inner = self.inner.lock();
        Ok(Self::enqueue_locked(&mut inner, item))
    }

    async fn enqueue_batch(&self, items: &[NewQueueItem]) -> CrawlResult<usize> {
        let deduped = super::pg::collapse_batch(items);
        let mut inner = self.inner.lock();
        let mut inserted = 0;
        for item in &deduped {
            if Self::enqueue_locked(&mut inner, item) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn dequeue(
        &self,
        execution_id: Uuid,
        worker_id: &str,
    ) -> CrawlResult<Option<UrlQueueItem>> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.lease_timeout)
                .map_err(|e| CrawlError::Internal(format!("lease timeout out of range: {e}")))?;

        let mut inner = self.inner.lock();
        let best = inner
            .entries
            .values_mut()
            .filter(|e| e.item.execution_id == execution_id)
            .filter(|e| {
                e.item.status == QueueItemStatus::Pending
                    || (e.item.status == QueueItemStatus::Processing
                        && e.item.lease_held_at.is_some_and(|held| held < stale_before))
            })
            .max_by(|a, b| {
                a.item
                    .priority
                    .cmp(&b.item.priority)
                    .then(b.item.created_at.cmp(&a.item.created_at))
                    .then(b.seq.cmp(&a.seq))
            });

        Ok(best.map(|entry| {
            entry.item.status = QueueItemStatus::Processing;
            entry.item.lease_held_by = Some(worker_id.to_string());
            entry.item.lease_held_at = Some(now);
            entry.item.clone()
        }))
    }

    async fn mark_completed(&self, id: Uuid, worker_id: &str) -> CrawlResult<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) =
            Self::holder_entry(&mut inner, id, worker_id, Some(QueueItemStatus::Completed))?
        {
            entry.item.status = QueueItemStatus::Completed;
            entry.item.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry: bool,
    ) -> CrawlResult<()> {
        let mut inner = self.inner.lock();
        let Some(entry) =
            Self::holder_entry(&mut inner, id, worker_id, Some(QueueItemStatus::Failed))?
        else {
            return Ok(());
        };
        entry.item.retry_count += 1;
        entry.item.last_error = Some(error.to_string());
        if retry {
            entry.item.status = QueueItemStatus::Pending;
            entry.item.lease_held_by = None;
            entry.item.lease_held_at = None;
        } else {
            entry.item.status = QueueItemStatus::Failed;
            entry.item.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_skipped(&self, id: Uuid, worker_id: &str, reason: &str) -> CrawlResult<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) =
            Self::holder_entry(&mut inner, id, worker_id, Some(QueueItemStatus::Skipped))?
        {
            entry.item.status = QueueItemStatus::Skipped;
            entry.item.skip_reason = Some(reason.to_string());
            entry.item.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn requeue_for_later(&self, id: Uuid, worker_id: &str) -> CrawlResult<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = Self::holder_entry(&mut inner, id, worker_id, None)? {
            entry.item.status = QueueItemStatus::Pending;
            entry.item.priority -= 1;
            entry.item.lease_held_by = None;
            entry.item.lease_held_at = None;
        }
        Ok(())
    }

    async fn cleanup_stale(&self, timeout: Duration) -> CrawlResult<u64> {
        let stale_before = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| CrawlError::Internal(format!("timeout out of range: {e}")))?;

        let mut inner = self.inner.lock();
        let mut reclaimed = 0;
        for entry in inner.entries.values_mut() {
            if entry.item.status == QueueItemStatus::Processing
                && entry.item.lease_held_at.is_some_and(|held| held < stale_before)
            {
                entry.item.status = QueueItemStatus::Pending;
                entry.item.lease_held_by = None;
                entry.item.lease_held_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn stats(&self, execution_id: Uuid) -> CrawlResult<BTreeMap<QueueItemStatus, i64>> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for entry in inner.entries.values() {
            if entry.item.execution_id == execution_id {
                *counts.entry(entry.item.status).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn get(&self, id: Uuid) -> CrawlResult<Option<UrlQueueItem>> {
        Ok(self.inner.lock().entries.get(&id).map(|e| e.item.clone()))
    }
}
