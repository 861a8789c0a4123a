//! Workflow persistence and the cache-through loader.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{Workflow, WorkflowConfig, WorkflowStatus};

#[derive(Clone)]
pub struct WorkflowStore {
    pool: PgPool,
}

impl WorkflowStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> CrawlResult<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT id, name, status, config, browser_profile_id, created_at
             FROM workflows WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let config: serde_json::Value = row.try_get("config")?;
        Ok(Some(Workflow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: status
                .parse::<WorkflowStatus>()
                .map_err(CrawlError::Internal)?,
            config: WorkflowConfig::from_json(&config)?,
            browser_profile_id: row.try_get("browser_profile_id")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    pub async fn insert(&self, workflow: &Workflow) -> CrawlResult<()> {
        let config = serde_json::to_value(&workflow.config)
            .map_err(|e| CrawlError::Internal(format!("serialize workflow config: {e}")))?;
        sqlx::query(
            "INSERT INTO workflows (id, name, status, config, browser_profile_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(workflow.status.as_str())
        .bind(config)
        .bind(workflow.browser_profile_id)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Cache-through workflow loader with a TTL (default one hour)
pub struct CachedWorkflows {
    store: WorkflowStore,
    cache: Mutex<LruCache<Uuid, (Workflow, Instant)>>,
    ttl: Duration,
}

impl CachedWorkflows {
    #[must_use]
    pub fn new(store: WorkflowStore, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub async fn get(&self, id: Uuid) -> CrawlResult<Option<Workflow>> {
        if let Some((workflow, cached_at)) = self.cache.lock().get(&id).cloned()
            && cached_at.elapsed() < self.ttl
        {
            return Ok(Some(workflow));
        }

        let loaded = self.store.get(id).await?;
        if let Some(workflow) = &loaded {
            self.cache
                .lock()
                .put(id, (workflow.clone(), Instant::now()));
        }
        Ok(loaded)
    }

    pub fn invalidate(&self, id: Uuid) {
        self.cache.lock().pop(&id);
    }
}
