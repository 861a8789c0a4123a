//! In-memory cache used by tests and single-box runs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::Cache;
use crate::error::CrawlResult;

#[derive(Debug, Default)]
pub struct MemoryCache {
    counters: DashMap<String, i64>,
    strings: DashMap<String, (String, Option<Instant>)>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn incr_by(&self, key: &str, delta: i64) -> CrawlResult<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn get_i64(&self, key: &str) -> CrawlResult<Option<i64>> {
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CrawlResult<bool> {
        let now = Instant::now();
        // Expired entries are as good as absent
        if let Some(existing) = self.strings.get(key)
            && existing.1.is_none_or(|deadline| deadline > now)
        {
            return Ok(false);
        }
        self.strings.insert(
            key.to_string(),
            (value.to_string(), now.checked_add(ttl)),
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> CrawlResult<()> {
        self.counters.remove(key);
        self.strings.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_and_read() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr_by("k", 3).await.expect("incr"), 3);
        assert_eq!(cache.incr_by("k", -1).await.expect("incr"), 2);
        assert_eq!(cache.get_i64("k").await.expect("get"), Some(2));
        assert_eq!(cache.get_i64("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn set_nx_is_first_writer_wins() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_nx("k", "a", ttl).await.expect("setnx"));
        assert!(!cache.set_nx("k", "b", ttl).await.expect("setnx"));
    }
}
