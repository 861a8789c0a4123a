//! Bus delivery metrics using lock-free atomic counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// All counters use `SeqCst` so snapshot reads stay coherent across fields
#[derive(Debug, Clone, Default)]
pub struct BusMetrics {
    published: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    redelivered: Arc<AtomicU64>,
}

impl BusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_published(&self, n: u64) {
        self.published.fetch_add(n, Ordering::SeqCst);
    }

    pub fn increment_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_acked(&self) {
        self.acked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_redelivered(&self) {
        self.redelivered.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            redelivered: self.redelivered.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub redelivered: u64,
}

impl BusMetricsSnapshot {
    /// Deliveries still unsettled (or lost to a crashed consumer)
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.delivered
            .saturating_sub(self.acked + self.redelivered)
    }
}
