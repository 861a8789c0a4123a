//! Postgres-backed URL queue.
//!
//! Dequeue relies on `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! claim the same row; every other transition is a single lease-predicated
//! UPDATE. The `(execution_id, url_hash)` unique index makes enqueue an
//! idempotent upsert.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{NewQueueItem, QueueItemStatus, UrlQueueItem};
use crate::queue::{DEFAULT_LEASE_TIMEOUT, UrlQueue};

pub struct PgUrlQueue {
    pool: PgPool,
    lease_timeout: Duration,
}

impl PgUrlQueue {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_lease_timeout(pool, DEFAULT_LEASE_TIMEOUT)
    }

    #[must_use]
    pub fn with_lease_timeout(pool: PgPool, lease_timeout: Duration) -> Self {
        Self {
            pool,
            lease_timeout,
        }
    }

    /// Verify an out-of-lease transition was this worker's own earlier call
    /// (idempotent no-op) rather than a lost lease
    async fn check_idempotent(
        &self,
        id: Uuid,
        worker_id: &str,
        expected: QueueItemStatus,
    ) -> CrawlResult<()> {
        let row = sqlx::query(
            "SELECT status, lease_held_by FROM url_queue WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(CrawlError::LeaseLost(id));
        };
        let status: String = row.try_get("status")?;
        let holder: Option<String> = row.try_get("lease_held_by")?;
        if status == expected.as_str() && holder.as_deref() == Some(worker_id) {
            return Ok(());
        }
        Err(CrawlError::LeaseLost(id))
    }
}

#[async_trait]
impl UrlQueue for PgUrlQueue {
    async fn enqueue(&self, item: &NewQueueItem) -> CrawlResult<bool> {
        let row = sqlx::query(
            r"
            INSERT INTO url_queue (
                id, execution_id, url, url_hash, depth, priority, status,
                parent_url_id, discovered_by_node, marker, phase_id,
                retry_count, created_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, 0, now(), $11)
            ON CONFLICT (execution_id, url_hash) DO UPDATE SET
                priority = GREATEST(url_queue.priority, EXCLUDED.priority),
                status = CASE WHEN url_queue.status = 'failed'
                              THEN 'pending' ELSE url_queue.status END
            RETURNING (xmax = 0) AS inserted
            ",
        )
        .bind(Uuid::new_v4())
        .bind(item.execution_id)
        .bind(&item.url)
        .bind(&item.url_hash)
        .bind(item.depth)
        .bind(item.priority)
        .bind(item.parent_url_id)
        .bind(item.discovered_by_node.as_deref())
        .bind(&item.marker)
        .bind(item.phase_id.as_deref())
        .bind(&item.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("inserted")?)
    }

    async fn enqueue_batch(&self, items: &[NewQueueItem]) -> CrawlResult<usize> {
        let items = collapse_batch(items);
        if items.is_empty() {
            return Ok(0);
        }

        let mut execution_ids = Vec::with_capacity(items.len());
        let mut urls = Vec::with_capacity(items.len());
        let mut hashes = Vec::with_capacity(items.len());
        let mut depths = Vec::with_capacity(items.len());
        let mut priorities = Vec::with_capacity(items.len());
        let mut parents: Vec<Option<Uuid>> = Vec::with_capacity(items.len());
        let mut discoverers: Vec<Option<String>> = Vec::with_capacity(items.len());
        let mut markers = Vec::with_capacity(items.len());
        let mut phase_ids: Vec<Option<String>> = Vec::with_capacity(items.len());
        let mut metadata = Vec::with_capacity(items.len());
        for item in &items {
            execution_ids.push(item.execution_id);
            urls.push(item.url.clone());
            hashes.push(item.url_hash.clone());
            depths.push(item.depth);
            priorities.push(item.priority);
            parents.push(item.parent_url_id);
            discoverers.push(item.discovered_by_node.clone());
            markers.push(item.marker.clone());
            phase_ids.push(item.phase_id.clone());
            metadata.push(item.metadata.to_string());
        }

        let rows = sqlx::query(
            r"
            INSERT INTO url_queue (
                id, execution_id, url, url_hash, depth, priority, status,
                parent_url_id, discovered_by_node, marker, phase_id,
                retry_count, created_at, metadata
            )
            SELECT gen_random_uuid(), u.execution_id, u.url, u.url_hash,
                   u.depth, u.priority, 'pending', u.parent_url_id,
                   u.discovered_by_node, u.marker, u.phase_id,
                   0, now(), u.metadata::jsonb
            FROM UNNEST(
                $1::uuid[], $2::text[], $3::text[], $4::int4[], $5::int4[],
                $6::uuid[], $7::text[], $8::text[], $9::text[], $10::text[]
            ) AS u(execution_id, url, url_hash, depth, priority,
                   parent_url_id, discovered_by_node, marker, phase_id, metadata)
            ON CONFLICT (execution_id, url_hash) DO UPDATE SET
                priority = GREATEST(url_queue.priority, EXCLUDED.priority),
                status = CASE WHEN url_queue.status = 'failed'
                              THEN 'pending' ELSE url_queue.status END
            RETURNING (xmax = 0) AS inserted
            ",
        )
        .bind(&execution_ids)
        .bind(&urls)
        .bind(&hashes)
        .bind(&depths)
        .bind(&priorities)
        .bind(&parents)
        .bind(&discoverers)
        .bind(&markers)
        .bind(&phase_ids)
        .bind(&metadata)
        .fetch_all(&self.pool)
        .await?;

        let mut inserted = 0;
        for row in rows {
            if row.try_get::<bool, _>("inserted")? {
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
        let row = sqlx::query(
            r"
            UPDATE url_queue
            SET status = 'processing', lease_held_by = $2, lease_held_at = now()
            WHERE id = (
                SELECT id FROM url_queue
                WHERE execution_id = $1
                  AND (status = 'pending'
                       OR (status = 'processing'
                           AND lease_held_at < now() - ($3 * interval '1 second')))
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            ",
        )
        .bind(execution_id)
        .bind(worker_id)
        .bind(self.lease_timeout.as_secs() as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| item_from_row(&r)).transpose()
    }

    async fn mark_completed(&self, id: Uuid, worker_id: &str) -> CrawlResult<()> {
        let result = sqlx::query(
            r"
            UPDATE url_queue SET status = 'completed', processed_at = now()
            WHERE id = $1 AND lease_held_by = $2 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        self.check_idempotent(id, worker_id, QueueItemStatus::Completed)
            .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry: bool,
    ) -> CrawlResult<()> {
        let query = if retry {
            r"
            UPDATE url_queue
            SET status = 'pending', lease_held_by = NULL, lease_held_at = NULL,
                retry_count = retry_count + 1, last_error = $3
            WHERE id = $1 AND lease_held_by = $2 AND status = 'processing'
            "
        } else {
            r"
            UPDATE url_queue
            SET status = 'failed', processed_at = now(),
                retry_count = retry_count + 1, last_error = $3
            WHERE id = $1 AND lease_held_by = $2 AND status = 'processing'
            "
        };

        let result = sqlx::query(query)
            .bind(id)
            .bind(worker_id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if retry {
            return Err(CrawlError::LeaseLost(id));
        }
        self.check_idempotent(id, worker_id, QueueItemStatus::Failed)
            .await
    }

    async fn mark_skipped(&self, id: Uuid, worker_id: &str, reason: &str) -> CrawlResult<()> {
        let result = sqlx::query(
            r"
            UPDATE url_queue
            SET status = 'skipped', skip_reason = $3, processed_at = now()
            WHERE id = $1 AND lease_held_by = $2 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(worker_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        self.check_idempotent(id, worker_id, QueueItemStatus::Skipped)
            .await
    }

    async fn requeue_for_later(&self, id: Uuid, worker_id: &str) -> CrawlResult<()> {
        let result = sqlx::query(
            r"
            UPDATE url_queue
            SET status = 'pending', priority = priority - 1,
                lease_held_by = NULL, lease_held_at = NULL
            WHERE id = $1 AND lease_held_by = $2 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(CrawlError::LeaseLost(id))
        }
    }

    async fn cleanup_stale(&self, timeout: Duration) -> CrawlResult<u64> {
        let result = sqlx::query(
            r"
            UPDATE url_queue
            SET status = 'pending', lease_held_by = NULL, lease_held_at = NULL
            WHERE status = 'processing'
              AND lease_held_at < now() - ($1 * interval '1 second')
            ",
        )
        .bind(timeout.as_secs() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, execution_id: Uuid) -> CrawlResult<BTreeMap<QueueItemStatus, i64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM url_queue WHERE execution_id = $1 GROUP BY status",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let status: QueueItemStatus = status
                .parse()
                .map_err(CrawlError::Internal)?;
            counts.insert(status, row.try_get::<i64, _>("n")?);
        }
        Ok(counts)
    }

    async fn get(&self, id: Uuid) -> CrawlResult<Option<UrlQueueItem>> {
        let row = sqlx::query("SELECT * FROM url_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| item_from_row(&r)).transpose()
    }
}

/// Collapse in-batch duplicates so the upsert never touches a row twice in
/// one statement (Postgres rejects that). First occurrence wins its lineage
/// fields; priority is lifted to the max.
pub(crate) fn collapse_batch(items: &[NewQueueItem]) -> Vec<NewQueueItem> {
    let mut seen: HashMap<(Uuid, String), usize> = HashMap::new();
    let mut out: Vec<NewQueueItem> = Vec::with_capacity(items.len());
    for item in items {
        let key = (item.execution_id, item.url_hash.clone());
        match seen.get(&key) {
            Some(&idx) => {
                out[idx].priority = out[idx].priority.max(item.priority);
            }
            None => {
                seen.insert(key, out.len());
                out.push(item.clone());
            }
        }
    }
    out
}

fn item_from_row(row: &PgRow) -> CrawlResult<UrlQueueItem> {
    let status: String = row.try_get("status")?;
    Ok(UrlQueueItem {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        url: row.try_get("url")?,
        url_hash: row.try_get("url_hash")?,
        depth: row.try_get("depth")?,
        priority: row.try_get("priority")?,
        status: status.parse().map_err(CrawlError::Internal)?,
        parent_url_id: row.try_get("parent_url_id")?,
        discovered_by_node: row.try_get("discovered_by_node")?,
        marker: row.try_get("marker")?,
        phase_id: row.try_get("phase_id")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        skip_reason: row.try_get("skip_reason")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        lease_held_at: row.try_get("lease_held_at")?,
        lease_held_by: row.try_get("lease_held_by")?,
        metadata: row.try_get("metadata")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_keeps_first_and_lifts_priority() {
        let execution_id = Uuid::new_v4();
        let mut a = NewQueueItem::seed(execution_id, "https://site.test/p/1", "phase-a")
            .expect("valid seed");
        a.priority = 1;
        let mut b = a.clone();
        b.priority = 5;
        b.marker = "other".into();

        let collapsed = collapse_batch(&[a, b]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].priority, 5);
        // First occurrence keeps its fields
        assert_eq!(collapsed[0].marker, "");
    }
}
