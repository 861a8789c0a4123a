//! Browser profile store.
//!
//! Profiles are resolved once per execution start, in a single scan over
//! every referenced id.

use std::collections::HashMap;

use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::browser::BrowserProfile;
use crate::error::{CrawlError, CrawlResult};

#[derive(Clone)]
pub struct ProfileStore {
    pool: PgPool,
}

impl ProfileStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch all requested profiles in one query
    pub async fn resolve(&self, ids: &[Uuid]) -> CrawlResult<HashMap<Uuid, BrowserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query("SELECT id, profile FROM browser_profiles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        let mut profiles = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let raw: serde_json::Value = row.try_get("profile")?;
            let profile: BrowserProfile = serde_json::from_value(raw)
                .map_err(|e| CrawlError::Internal(format!("malformed profile {id}: {e}")))?;
            profiles.insert(id, profile);
        }
        Ok(profiles)
    }

    pub async fn insert(&self, profile: &BrowserProfile) -> CrawlResult<()> {
        let raw = serde_json::to_value(profile)
            .map_err(|e| CrawlError::Internal(format!("serialize profile: {e}")))?;
        sqlx::query("INSERT INTO browser_profiles (id, name, profile) VALUES ($1, $2, $3)")
            .bind(profile.id)
            .bind(&profile.name)
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
