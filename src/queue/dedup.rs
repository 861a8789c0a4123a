//! Per-execution, per-phase URL dedup.
//!
//! The default mode is a Bloom filter sized for 1M URLs at 0.1% false
//! positives per execution; the cost of a false positive is skipping that
//! URL. Exact-on-collision mode confirms Bloom hits against the cache
//! (`SETNX`, 24h TTL) before declaring a duplicate. Strict mode skips the
//! filter entirely and pays a cache round-trip per check.

use std::sync::Arc;
use std::time::Duration;

use bloomfilter::Bloom;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::{CrawlError, CrawlResult};
use crate::utils::url_hash;

const BLOOM_CAPACITY: usize = 1_000_000;
const BLOOM_FP_RATE: f64 = 0.001;
const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Bloom only; ~0.1% of fresh URLs are misjudged as duplicates
    Probabilistic,
    /// Bloom, with cache confirmation on hits
    ExactOnCollision,
    /// Cache only; for workers that want strict dedup without a filter
    Strict,
}

pub struct UrlDeduplicator {
    mode: DedupMode,
    filters: DashMap<Uuid, Mutex<Bloom<String>>>,
    cache: Option<Arc<dyn Cache>>,
}

impl UrlDeduplicator {
    /// Probabilistic dedup with no cache fallback
    #[must_use]
    pub fn probabilistic() -> Self {
        Self {
            mode: DedupMode::Probabilistic,
            filters: DashMap::new(),
            cache: None,
        }
    }

    /// Bloom-backed dedup confirming collisions against the cache
    #[must_use]
    pub fn exact_on_collision(cache: Arc<dyn Cache>) -> Self {
        Self {
            mode: DedupMode::ExactOnCollision,
            filters: DashMap::new(),
            cache: Some(cache),
        }
    }

    /// Cache-only strict dedup
    #[must_use]
    pub fn strict(cache: Arc<dyn Cache>) -> Self {
        Self {
            mode: DedupMode::Strict,
            filters: DashMap::new(),
            cache: Some(cache),
        }
    }

    /// Test-and-insert: true means this URL was already seen for this
    /// execution and phase.
    pub async fn is_duplicate(
        &self,
        execution_id: Uuid,
        phase_id: &str,
        url: &str,
    ) -> CrawlResult<bool> {
        let member = format!("{phase_id}:{url}");

        if self.mode == DedupMode::Strict {
            return self.cache_claims_duplicate(execution_id, &member).await;
        }

        let bloom_hit = {
            let filter = self.filter_for(execution_id)?;
            let mut filter = filter.lock();
            filter.check_and_set(&member)
        };
        if !bloom_hit {
            return Ok(false);
        }

        if self.mode == DedupMode::ExactOnCollision {
            let confirmed = self.cache_claims_duplicate(execution_id, &member).await?;
            if !confirmed {
                debug!(%execution_id, phase_id, url, "bloom false positive");
            }
            return Ok(confirmed);
        }

        Ok(true)
    }

    /// Release the filter for a finished execution
    pub fn clear(&self, execution_id: Uuid) {
        self.filters.remove(&execution_id);
    }

    /// Number of executions with a live filter
    #[must_use]
    pub fn tracked_executions(&self) -> usize {
        self.filters.len()
    }

    fn filter_for(
        &self,
        execution_id: Uuid,
    ) -> CrawlResult<dashmap::mapref::one::Ref<'_, Uuid, Mutex<Bloom<String>>>> {
        if let Some(existing) = self.filters.get(&execution_id) {
            return Ok(existing);
        }
        let bloom = Bloom::new_for_fp_rate(BLOOM_CAPACITY, BLOOM_FP_RATE)
            .map_err(|e| CrawlError::Internal(format!("bloom filter allocation: {e}")))?;
        Ok(self
            .filters
            .entry(execution_id)
            .or_insert_with(|| Mutex::new(bloom))
            .downgrade())
    }

    async fn cache_claims_duplicate(
        &self,
        execution_id: Uuid,
        member: &str,
    ) -> CrawlResult<bool> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| CrawlError::Internal("dedup mode requires a cache".into()))?;
        let key = format!("dedup:{execution_id}:{}", url_hash(member));
        let inserted = cache.set_nx(&key, "1", CACHE_TTL).await?;
        Ok(!inserted)
    }
}
