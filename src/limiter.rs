//! Per-domain politeness delay.
//!
//! Workflows declare `rate_limit_delay` milliseconds between operations
//! against the same domain. Tracking is per-worker and best-effort; global
//! rate limiting is explicitly not attempted.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::utils::extract_domain;

/// Rate limit decision for a crawl operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Operation may proceed
    Allow,
    /// Operation should wait this long first
    Deny { retry_after: Duration },
}

#[derive(Default)]
pub struct DomainRateLimiter {
    last_op: DashMap<String, Instant>,
}

impl DomainRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check; records the operation on Allow
    pub fn check(&self, url: &str, delay: Duration) -> RateLimitDecision {
        if delay.is_zero() {
            return RateLimitDecision::Allow;
        }
        let Some(domain) = extract_domain(url) else {
            return RateLimitDecision::Allow;
        };

        let now = Instant::now();
        match self.last_op.entry(domain) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                RateLimitDecision::Allow
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let elapsed = now.duration_since(*slot.get());
                if elapsed >= delay {
                    slot.insert(now);
                    RateLimitDecision::Allow
                } else {
                    RateLimitDecision::Deny {
                        retry_after: delay - elapsed,
                    }
                }
            }
        }
    }

    /// Sleep until the domain admits the operation
    pub async fn acquire(&self, url: &str, delay: Duration) {
        loop {
            match self.check(url, delay) {
                RateLimitDecision::Allow => return,
                RateLimitDecision::Deny { retry_after } => {
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// Number of domains currently tracked
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.last_op.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_always_allows() {
        let limiter = DomainRateLimiter::new();
        for _ in 0..10 {
            assert_eq!(
                limiter.check("https://site.test/a", Duration::ZERO),
                RateLimitDecision::Allow
            );
        }
    }

    #[test]
    fn second_op_within_delay_is_denied() {
        let limiter = DomainRateLimiter::new();
        let delay = Duration::from_secs(5);
        assert_eq!(
            limiter.check("https://site.test/a", delay),
            RateLimitDecision::Allow
        );
        assert!(matches!(
            limiter.check("https://site.test/b", delay),
            RateLimitDecision::Deny { .. }
        ));
        // Different domain is unaffected
        assert_eq!(
            limiter.check("https://other.test/a", delay),
            RateLimitDecision::Allow
        );
    }
}
