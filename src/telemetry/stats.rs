//! Batched execution stats.
//!
//! Lock-free accumulation into per-execution atomic counters, flushed every
//! window as one POST to the orchestrator's internal batch endpoint. A
//! failed flush re-adds the swapped counts so nothing is lost, only late.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CrawlResult;

#[derive(Default)]
struct StatsCell {
    urls_processed: AtomicI64,
    urls_discovered: AtomicI64,
    items_extracted: AtomicI64,
    errors: AtomicI64,
    phase_processed: DashMap<String, AtomicI64>,
}

/// One execution's delta within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsUpdate {
    pub execution_id: Uuid,
    pub urls_processed: i64,
    pub urls_discovered: i64,
    pub items_extracted: i64,
    pub errors: i64,
    #[serde(default)]
    pub phases: HashMap<String, i64>,
}

impl StatsUpdate {
    fn is_empty(&self) -> bool {
        self.urls_processed == 0
            && self.urls_discovered == 0
            && self.items_extracted == 0
            && self.errors == 0
            && self.phases.is_empty()
    }
}

/// Wire body of `POST /internal/stats/batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsBatch {
    pub updates: Vec<StatsUpdate>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

pub struct StatsReporter {
    cells: DashMap<Uuid, Arc<StatsCell>>,
    client: reqwest::Client,
    orchestrator_url: String,
    worker_id: String,
}

impl StatsReporter {
    #[must_use]
    pub fn new(orchestrator_url: &str, worker_id: &str) -> Self {
        Self {
            cells: DashMap::new(),
            client: reqwest::Client::new(),
            orchestrator_url: orchestrator_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
        }
    }

    fn cell(&self, execution_id: Uuid) -> Arc<StatsCell> {
        Arc::clone(
            &self
                .cells
                .entry(execution_id)
                .or_insert_with(|| Arc::new(StatsCell::default())),
        )
    }

    pub fn record_processed(&self, execution_id: Uuid, phase_id: &str) {
        let cell = self.cell(execution_id);
        cell.urls_processed.fetch_add(1, Ordering::Relaxed);
        cell.phase_processed
            .entry(phase_id.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovered(&self, execution_id: Uuid, n: i64) {
        self.cell(execution_id)
            .urls_discovered
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_items(&self, execution_id: Uuid, n: i64) {
        self.cell(execution_id)
            .items_extracted
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self, execution_id: Uuid) {
        self.cell(execution_id).errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Non-destructive view of an execution's unflushed counters
    #[must_use]
    pub fn peek(&self, execution_id: Uuid) -> StatsUpdate {
        let mut update = StatsUpdate {
            execution_id,
            urls_processed: 0,
            urls_discovered: 0,
            items_extracted: 0,
            errors: 0,
            phases: HashMap::new(),
        };
        if let Some(cell) = self.cells.get(&execution_id) {
            update.urls_processed = cell.urls_processed.load(Ordering::Relaxed);
            update.urls_discovered = cell.urls_discovered.load(Ordering::Relaxed);
            update.items_extracted = cell.items_extracted.load(Ordering::Relaxed);
            update.errors = cell.errors.load(Ordering::Relaxed);
            for phase in cell.phase_processed.iter() {
                update
                    .phases
                    .insert(phase.key().clone(), phase.value().load(Ordering::Relaxed));
            }
        }
        update
    }

    /// Swap every counter to zero and POST the non-empty deltas.
    ///
    /// An empty buffer flushes to a no-op: no request is sent.
    pub async fn flush(&self) -> CrawlResult<()> {
        let mut updates = Vec::new();
        for entry in self.cells.iter() {
            let cell = entry.value();
            let mut phases = HashMap::new();
            for phase in cell.phase_processed.iter() {
                let count = phase.value().swap(0, Ordering::Relaxed);
                if count != 0 {
                    phases.insert(phase.key().clone(), count);
                }
            }
            let update = StatsUpdate {
                execution_id: *entry.key(),
                urls_processed: cell.urls_processed.swap(0, Ordering::Relaxed),
                urls_discovered: cell.urls_discovered.swap(0, Ordering::Relaxed),
                items_extracted: cell.items_extracted.swap(0, Ordering::Relaxed),
                errors: cell.errors.swap(0, Ordering::Relaxed),
                phases,
            };
            if !update.is_empty() {
                updates.push(update);
            }
        }

        if updates.is_empty() {
            return Ok(());
        }

        let batch = StatsBatch {
            updates,
            timestamp: Utc::now(),
            worker_id: Some(self.worker_id.clone()),
        };

        let url = format!("{}/internal/stats/batch", self.orchestrator_url);
        let result = self.client.post(&url).json(&batch).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(updates = batch.updates.len(), "stats batch flushed");
                Ok(())
            }
            Ok(response) => {
                warn!("stats batch rejected with {}", response.status());
                self.restore(batch);
                Ok(())
            }
            Err(e) => {
                warn!("stats batch failed: {e}");
                self.restore(batch);
                Ok(())
            }
        }
    }

    /// Re-add a failed batch so the next window carries it
    fn restore(&self, batch: StatsBatch) {
        for update in batch.updates {
            let cell = self.cell(update.execution_id);
            cell.urls_processed
                .fetch_add(update.urls_processed, Ordering::Relaxed);
            cell.urls_discovered
                .fetch_add(update.urls_discovered, Ordering::Relaxed);
            cell.items_extracted
                .fetch_add(update.items_extracted, Ordering::Relaxed);
            cell.errors.fetch_add(update.errors, Ordering::Relaxed);
            for (phase, count) in update.phases {
                cell.phase_processed
                    .entry(phase)
                    .or_insert_with(|| AtomicI64::new(0))
                    .fetch_add(count, Ordering::Relaxed);
            }
        }
    }

    /// Release a finished execution's counters
    pub fn clear(&self, execution_id: Uuid) {
        self.cells.remove(&execution_id);
    }

    pub fn spawn_flush_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(super::flush_jitter(interval)).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = reporter.flush().await {
                    warn!("stats flush loop: {e}");
                }
            }
        })
    }
}
