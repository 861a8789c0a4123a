//! Durable URL queue with per-execution dedup, priority, and lease-based
//! at-least-once delivery.
//!
//! The queue is the only writer of `url_queue` rows; every state transition
//! goes through one of its atomic operations. `PgUrlQueue` is the production
//! implementation; `MemoryUrlQueue` mirrors its semantics for tests and
//! single-box runs.

pub mod dedup;
mod memory;
mod pg;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CrawlResult;
use crate::model::{NewQueueItem, QueueItemStatus, UrlQueueItem};

pub use dedup::{DedupMode, UrlDeduplicator};
pub use memory::MemoryUrlQueue;
pub use pg::PgUrlQueue;

/// Default lease timeout: a worker that has not finished an item within this
/// window has lost it
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait UrlQueue: Send + Sync {
    /// Upsert keyed by `(execution_id, url_hash)`.
    ///
    /// On conflict the priority is lifted to the max of both, a `failed` row
    /// is reset to `pending`, and everything else is left untouched: the
    /// first discovery's `parent_url_id`, `discovered_by_node`, `marker`,
    /// and `phase_id` win. Returns true iff a new row was inserted.
    async fn enqueue(&self, item: &NewQueueItem) -> CrawlResult<bool>;

    /// Batch upsert with `enqueue` semantics in one round-trip.
    ///
    /// Duplicates inside the batch are collapsed first (first occurrence
    /// wins, priority lifted). Returns the number of newly inserted rows.
    async fn enqueue_batch(&self, items: &[NewQueueItem]) -> CrawlResult<usize>;

    /// Atomically claim the best eligible item for this execution.
    ///
    /// Eligible: `pending`, or `processing` with a lease older than the
    /// queue's lease timeout. Order: priority descending, then oldest
    /// `created_at`. Concurrent dequeues never return the same item.
    /// Returns None when nothing is eligible; never blocks.
    async fn dequeue(
        &self,
        execution_id: Uuid,
        worker_id: &str,
    ) -> CrawlResult<Option<UrlQueueItem>>;

    /// Terminal success. Lease-checked; idempotent for the lease holder.
    async fn mark_completed(&self, id: Uuid, worker_id: &str) -> CrawlResult<()>;

    /// Record a failure. `retry` requeues as `pending` with the lease
    /// cleared; otherwise the item lands in terminal `failed`. Either way
    /// `retry_count` is incremented and the error recorded. Lease-checked.
    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry: bool,
    ) -> CrawlResult<()>;

    /// Terminal skip (router drop path). Lease-checked.
    async fn mark_skipped(&self, id: Uuid, worker_id: &str, reason: &str) -> CrawlResult<()>;

    /// Put the item back with its priority decremented. Lease-checked.
    async fn requeue_for_later(&self, id: Uuid, worker_id: &str) -> CrawlResult<()>;

    /// Batch-reclaim expired leases back to `pending`; returns the count.
    async fn cleanup_stale(&self, timeout: Duration) -> CrawlResult<u64>;

    /// Per-status row counts for an execution.
    async fn stats(&self, execution_id: Uuid) -> CrawlResult<BTreeMap<QueueItemStatus, i64>>;

    /// Fetch a single item by id (audit and tests).
    async fn get(&self, id: Uuid) -> CrawlResult<Option<UrlQueueItem>>;
}

/// True when an execution has no live work left in the queue
#[must_use]
pub fn is_drained(stats: &BTreeMap<QueueItemStatus, i64>) -> bool {
    stats.get(&QueueItemStatus::Pending).copied().unwrap_or(0) == 0
        && stats
            .get(&QueueItemStatus::Processing)
            .copied()
            .unwrap_or(0)
            == 0
}
