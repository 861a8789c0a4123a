//! Proxy pool with per-proxy health counters.
//!
//! Selection favors the healthiest proxy; untried proxies rank highest so
//! every proxy gets a chance to prove itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub id: String,
    pub url: String,
}

pub struct ProxyState {
    pub config: ProxyConfig,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl ProxyState {
    fn usage(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed) + self.failure_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let usage = self.usage();
        if usage == 0 {
            // Untried proxies rank above everything
            return 1.01;
        }
        self.success_count.load(Ordering::Relaxed) as f64 / usage as f64
    }
}

#[derive(Default)]
pub struct ProxyPool {
    proxies: RwLock<Vec<Arc<ProxyState>>>,
}

impl ProxyPool {
    #[must_use]
    pub fn new(configs: Vec<ProxyConfig>) -> Self {
        let pool = Self::default();
        pool.reload(configs);
        pool
    }

    /// Replace the proxy set, dropping old counters
    pub fn reload(&self, configs: Vec<ProxyConfig>) {
        *self.proxies.write() = configs
            .into_iter()
            .map(|config| {
                Arc::new(ProxyState {
                    config,
                    success_count: AtomicU64::new(0),
                    failure_count: AtomicU64::new(0),
                })
            })
            .collect();
    }

    /// Healthiest proxy, or None when the pool is empty
    #[must_use]
    pub fn select_healthy(&self) -> Option<Arc<ProxyState>> {
        let proxies = self.proxies.read();
        proxies
            .iter()
            .max_by(|a, b| {
                a.success_rate()
                    .partial_cmp(&b.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(Arc::clone)
    }

    pub fn record_success(&self, proxy_id: &str) {
        if let Some(proxy) = self.find(proxy_id) {
            proxy.success_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, proxy_id: &str) {
        if let Some(proxy) = self.find(proxy_id) {
            proxy.failure_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn find(&self, proxy_id: &str) -> Option<Arc<ProxyState>> {
        let proxies = self.proxies.read();
        proxies
            .iter()
            .find(|p| p.config.id == proxy_id)
            .map(Arc::clone)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProxyPool {
        ProxyPool::new(vec![
            ProxyConfig {
                id: "a".into(),
                url: "http://proxy-a:3128".into(),
            },
            ProxyConfig {
                id: "b".into(),
                url: "http://proxy-b:3128".into(),
            },
        ])
    }

    #[test]
    fn unhealthy_proxies_lose_selection() {
        let pool = pool();
        pool.record_failure("a");
        pool.record_failure("a");
        pool.record_success("b");

        let selected = pool.select_healthy().expect("proxy");
        assert_eq!(selected.config.id, "b");
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool = ProxyPool::new(vec![]);
        assert!(pool.select_healthy().is_none());
    }
}
