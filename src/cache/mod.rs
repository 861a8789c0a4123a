//! Cache seam.
//!
//! The completion tracker and the strict dedup path need a handful of
//! atomic cache operations; this trait is that surface. Production uses
//! Redis, tests use the in-memory implementation.

mod memory;
mod redis_cache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CrawlResult;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Atomic increment; returns the post-increment value
    async fn incr_by(&self, key: &str, delta: i64) -> CrawlResult<i64>;

    /// Read an integer key; None when unset
    async fn get_i64(&self, key: &str) -> CrawlResult<Option<i64>>;

    /// Set-if-absent with TTL; returns true when this call set the key
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CrawlResult<bool>;

    /// Delete a key; deleting a missing key is not an error
    async fn del(&self, key: &str) -> CrawlResult<()>;
}
