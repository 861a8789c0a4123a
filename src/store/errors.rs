//! Execution error log rows.

use sqlx::postgres::PgPool;

use crate::error::CrawlResult;
use crate::model::ExecutionError;

#[derive(Clone)]
pub struct ErrorStore {
    pool: PgPool,
}

impl ErrorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, errors: &[ExecutionError]) -> CrawlResult<()> {
        if errors.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(errors.len());
        let mut execution_ids = Vec::with_capacity(errors.len());
        let mut urls = Vec::with_capacity(errors.len());
        let mut kinds = Vec::with_capacity(errors.len());
        let mut messages = Vec::with_capacity(errors.len());
        let mut phase_ids: Vec<Option<String>> = Vec::with_capacity(errors.len());
        let mut retries = Vec::with_capacity(errors.len());
        let mut created = Vec::with_capacity(errors.len());
        for error in errors {
            ids.push(error.id);
            execution_ids.push(error.execution_id);
            urls.push(error.url.clone());
            kinds.push(error.error_type.as_str().to_string());
            messages.push(error.message.clone());
            phase_ids.push(error.phase_id.clone());
            retries.push(error.retry_count);
            created.push(error.created_at);
        }

        sqlx::query(
            r"
            INSERT INTO execution_errors (
                id, execution_id, url, error_type, message,
                phase_id, retry_count, created_at
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[], $4::text[], $5::text[],
                $6::text[], $7::int4[], $8::timestamptz[]
            )
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&ids)
        .bind(&execution_ids)
        .bind(&urls)
        .bind(&kinds)
        .bind(&messages)
        .bind(&phase_ids)
        .bind(&retries)
        .bind(&created)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
