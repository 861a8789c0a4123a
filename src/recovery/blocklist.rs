//! Timed domain block list.
//!
//! `skip_domain` actions land here; workers consult the list before
//! processing a task and drop URLs whose domain is blocked. Entries expire
//! on their own.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::info;

#[derive(Default)]
pub struct DomainBlockList {
    entries: DashMap<String, Instant>,
}

impl DomainBlockList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a domain until `ttl` from now; extends an existing entry
    pub fn block(&self, domain: &str, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        info!("blocking domain {domain} for {}s", ttl.as_secs());
        self.entries
            .entry(domain.to_lowercase())
            .and_modify(|e| *e = (*e).max(expiry))
            .or_insert(expiry);
    }

    /// Live check; expired entries are removed on the way out
    #[must_use]
    pub fn is_blocked(&self, domain: &str) -> bool {
        let key = domain.to_lowercase();
        let Some(entry) = self.entries.get(&key) else {
            return false;
        };
        if *entry <= Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return false;
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_until_expiry() {
        let list = DomainBlockList::new();
        list.block("slow.example", Duration::from_millis(30));
        assert!(list.is_blocked("slow.example"));
        assert!(list.is_blocked("SLOW.example"));
        assert!(!list.is_blocked("other.example"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!list.is_blocked("slow.example"));
        assert!(list.is_empty());
    }
}
