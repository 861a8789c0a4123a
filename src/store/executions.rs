//! Execution rows: creation, counter application, one-shot finalization.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{Execution, ExecutionStatus};
use crate::telemetry::StatsUpdate;

#[derive(Clone)]
pub struct ExecutionStore {
    pool: PgPool,
}

impl ExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, workflow_id: Uuid) -> CrawlResult<Execution> {
        let execution = Execution {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            urls_processed: 0,
            urls_discovered: 0,
            items_extracted: 0,
            errors: 0,
            phase_stats: HashMap::new(),
            metadata: serde_json::json!({}),
        };

        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, started_at, metadata)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(&execution.metadata)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    pub async fn get(&self, id: Uuid) -> CrawlResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| execution_from_row(&r)).transpose()
    }

    /// One-shot terminal transition. Returns true when this call moved the
    /// row; false means it was already terminal (idempotent finalize).
    pub async fn finalize(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> CrawlResult<bool> {
        debug_assert!(status.is_terminal());
        let result = sqlx::query(
            r"
            UPDATE executions
            SET status = $2, completed_at = now(),
                metadata = CASE WHEN $3::text IS NULL THEN metadata
                                ELSE jsonb_set(metadata, '{reason}', to_jsonb($3::text)) END
            WHERE id = $1 AND status IN ('pending', 'running')
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Apply a worker's stats deltas. Counters only ever grow; the per-phase
    /// breakdown is merged additively under a row lock.
    pub async fn apply_stats(&self, updates: &[StatsUpdate]) -> CrawlResult<()> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let row = sqlx::query("SELECT phase_stats FROM executions WHERE id = $1 FOR UPDATE")
                .bind(update.execution_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                continue;
            };

            let mut phase_stats: serde_json::Value = row.try_get("phase_stats")?;
            if !phase_stats.is_object() {
                phase_stats = serde_json::json!({});
            }
            if let Some(object) = phase_stats.as_object_mut() {
                for (phase, delta) in &update.phases {
                    let current = object.get(phase).and_then(serde_json::Value::as_i64).unwrap_or(0);
                    object.insert(phase.clone(), serde_json::json!(current + delta));
                }
            }

            sqlx::query(
                r"
                UPDATE executions
                SET urls_processed = urls_processed + $2,
                    urls_discovered = urls_discovered + $3,
                    items_extracted = items_extracted + $4,
                    errors = errors + $5,
                    phase_stats = $6
                WHERE id = $1
                ",
            )
            .bind(update.execution_id)
            .bind(update.urls_processed)
            .bind(update.urls_discovered)
            .bind(update.items_extracted)
            .bind(update.errors)
            .bind(&phase_stats)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn execution_from_row(row: &PgRow) -> CrawlResult<Execution> {
    let status: String = row.try_get("status")?;
    let phase_stats: serde_json::Value = row.try_get("phase_stats")?;
    let phase_stats: HashMap<String, i64> =
        serde_json::from_value(phase_stats).unwrap_or_default();
    Ok(Execution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(CrawlError::Internal)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        urls_processed: row.try_get("urls_processed")?,
        urls_discovered: row.try_get("urls_discovered")?,
        items_extracted: row.try_get("items_extracted")?,
        errors: row.try_get("errors")?,
        phase_stats,
        metadata: row.try_get("metadata")?,
    })
}
