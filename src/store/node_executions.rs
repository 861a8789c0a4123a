//! Node execution audit rows.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::error::CrawlResult;
use crate::model::NodeExecution;

/// Where closed audit records land; the worker only needs this much
#[async_trait]
pub trait NodeExecutionSink: Send + Sync {
    async fn insert_batch(&self, records: &[NodeExecution]) -> CrawlResult<()>;
}

#[derive(Clone)]
pub struct NodeExecutionStore {
    pool: PgPool,
}

impl NodeExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeExecutionSink for NodeExecutionStore {
    /// Insert closed records for one phase run in a single statement
    async fn insert_batch(&self, records: &[NodeExecution]) -> CrawlResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut execution_ids = Vec::with_capacity(records.len());
        let mut queue_item_ids: Vec<Option<uuid::Uuid>> = Vec::with_capacity(records.len());
        let mut node_ids = Vec::with_capacity(records.len());
        let mut node_types = Vec::with_capacity(records.len());
        let mut statuses = Vec::with_capacity(records.len());
        let mut started = Vec::with_capacity(records.len());
        let mut completed = Vec::with_capacity(records.len());
        let mut durations: Vec<Option<i64>> = Vec::with_capacity(records.len());
        let mut inputs: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut outputs: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut discovered = Vec::with_capacity(records.len());
        let mut extracted = Vec::with_capacity(records.len());
        let mut errors: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut retries = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            execution_ids.push(record.execution_id);
            queue_item_ids.push(record.url_queue_item_id);
            node_ids.push(record.node_id.clone());
            node_types.push(record.node_type.clone());
            statuses.push(record.status.as_str().to_string());
            started.push(record.started_at);
            completed.push(record.completed_at);
            durations.push(record.duration_ms);
            inputs.push(record.input_snapshot.as_ref().map(ToString::to_string));
            outputs.push(record.output_snapshot.as_ref().map(ToString::to_string));
            discovered.push(record.urls_discovered_count);
            extracted.push(record.items_extracted_count);
            errors.push(record.error.clone());
            retries.push(record.retry_count);
        }

        sqlx::query(
            r"
            INSERT INTO node_executions (
                id, execution_id, url_queue_item_id, node_id, node_type,
                status, started_at, completed_at, duration_ms,
                input_snapshot, output_snapshot,
                urls_discovered_count, items_extracted_count, error, retry_count
            )
            SELECT u.id, u.execution_id, u.url_queue_item_id, u.node_id,
                   u.node_type, u.status, u.started_at, u.completed_at,
                   u.duration_ms, u.input_snapshot::jsonb, u.output_snapshot::jsonb,
                   u.urls_discovered_count, u.items_extracted_count,
                   u.error, u.retry_count
            FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::text[],
                $6::text[], $7::timestamptz[], $8::timestamptz[], $9::int8[],
                $10::text[], $11::text[], $12::int4[], $13::int4[],
                $14::text[], $15::int4[]
            ) AS u(id, execution_id, url_queue_item_id, node_id, node_type,
                   status, started_at, completed_at, duration_ms,
                   input_snapshot, output_snapshot,
                   urls_discovered_count, items_extracted_count, error, retry_count)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&ids)
        .bind(&execution_ids)
        .bind(&queue_item_ids)
        .bind(&node_ids)
        .bind(&node_types)
        .bind(&statuses)
        .bind(&started)
        .bind(&completed)
        .bind(&durations)
        .bind(&inputs)
        .bind(&outputs)
        .bind(&discovered)
        .bind(&extracted)
        .bind(&errors)
        .bind(&retries)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
