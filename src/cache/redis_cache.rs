//! Redis-backed cache over a multiplexed connection manager.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::cache::Cache;
use crate::error::{CrawlError, CrawlResult};

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect and build the shared connection manager.
    ///
    /// The manager reconnects internally, so clones are cheap and long-lived.
    pub async fn connect(url: &str) -> CrawlResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| CrawlError::Cache(format!("open: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CrawlError::Cache(format!("connect: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn incr_by(&self, key: &str, delta: i64) -> CrawlResult<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, delta)
            .await
            .map_err(|e| CrawlError::Cache(format!("incrby {key}: {e}")))
    }

    async fn get_i64(&self, key: &str) -> CrawlResult<Option<i64>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| CrawlError::Cache(format!("get {key}: {e}")))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CrawlResult<bool> {
        let mut conn = self.manager.clone();
        // SET key value NX EX <secs>: atomic set-if-absent with expiry
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| CrawlError::Cache(format!("setnx {key}: {e}")))?;
        Ok(outcome.is_some())
    }

    async fn del(&self, key: &str) -> CrawlResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| CrawlError::Cache(format!("del {key}: {e}")))?;
        Ok(())
    }
}
