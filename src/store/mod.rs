//! Relational store: connection, schema bootstrap, and table-scoped stores.

pub mod errors;
pub mod executions;
pub mod node_executions;
pub mod profiles;
pub mod workflows;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::CrawlResult;

pub use errors::ErrorStore;
pub use executions::ExecutionStore;
pub use node_executions::{NodeExecutionSink, NodeExecutionStore};
pub use profiles::ProfileStore;
pub use workflows::{CachedWorkflows, WorkflowStore};

/// Connect a pool sized for daemon use
pub async fn connect(database_url: &str) -> CrawlResult<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await?)
}

/// Idempotent DDL for the five logical tables plus browser profiles.
///
/// Index choices follow the dequeue and retrieval paths: the partial
/// ordering index drives `dequeue`, the unique hash index drives enqueue
/// dedup.
pub async fn ensure_schema(pool: &PgPool) -> CrawlResult<()> {
    let statements = [
        r"CREATE TABLE IF NOT EXISTS workflows (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            config JSONB NOT NULL,
            browser_profile_id UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE TABLE IF NOT EXISTS browser_profiles (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            profile JSONB NOT NULL
        )",
        r"CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            workflow_id UUID NOT NULL,
            status TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            completed_at TIMESTAMPTZ,
            urls_processed BIGINT NOT NULL DEFAULT 0,
            urls_discovered BIGINT NOT NULL DEFAULT 0,
            items_extracted BIGINT NOT NULL DEFAULT 0,
            errors BIGINT NOT NULL DEFAULT 0,
            phase_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb
        )",
        r"CREATE TABLE IF NOT EXISTS url_queue (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            url TEXT NOT NULL,
            url_hash TEXT NOT NULL,
            depth INT4 NOT NULL DEFAULT 0,
            priority INT4 NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            parent_url_id UUID,
            discovered_by_node TEXT,
            marker TEXT NOT NULL DEFAULT '',
            phase_id TEXT,
            retry_count INT4 NOT NULL DEFAULT 0,
            last_error TEXT,
            skip_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            processed_at TIMESTAMPTZ,
            lease_held_at TIMESTAMPTZ,
            lease_held_by TEXT,
            metadata JSONB NOT NULL DEFAULT 'null'::jsonb
        )",
        r"CREATE UNIQUE INDEX IF NOT EXISTS url_queue_execution_hash
            ON url_queue (execution_id, url_hash)",
        r"CREATE INDEX IF NOT EXISTS url_queue_dequeue
            ON url_queue (execution_id, status, priority DESC, created_at ASC)",
        r"CREATE TABLE IF NOT EXISTS node_executions (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            url_queue_item_id UUID,
            node_id TEXT NOT NULL,
            node_type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            duration_ms BIGINT,
            input_snapshot JSONB,
            output_snapshot JSONB,
            urls_discovered_count INT4 NOT NULL DEFAULT 0,
            items_extracted_count INT4 NOT NULL DEFAULT 0,
            error TEXT,
            retry_count INT4 NOT NULL DEFAULT 0
        )",
        r"CREATE INDEX IF NOT EXISTS node_executions_execution
            ON node_executions (execution_id)",
        r"CREATE TABLE IF NOT EXISTS extracted_items (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            workflow_id UUID NOT NULL,
            url_queue_item_id UUID NOT NULL,
            node_execution_id UUID,
            item_type TEXT NOT NULL,
            title TEXT,
            price DOUBLE PRECISION,
            currency TEXT,
            availability TEXT,
            rating DOUBLE PRECISION,
            review_count BIGINT,
            attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
            extracted_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE INDEX IF NOT EXISTS extracted_items_execution
            ON extracted_items (execution_id)",
        r"CREATE TABLE IF NOT EXISTS execution_errors (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            url TEXT NOT NULL,
            error_type TEXT NOT NULL,
            message TEXT NOT NULL,
            phase_id TEXT,
            retry_count INT4 NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE INDEX IF NOT EXISTS execution_errors_execution
            ON execution_errors (execution_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
