//! Batched error logging.
//!
//! Errors buffer per execution, bounded at 1000 to survive error storms;
//! overflow is counted but not stored. Flushed to the orchestrator's
//! internal errors endpoint every window.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CrawlResult;
use crate::model::ExecutionError;

/// Per-execution buffer cap
const MAX_BUFFERED_ERRORS: usize = 1000;

/// Wire body of `POST /internal/errors/batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBatch {
    pub errors: HashMap<Uuid, Vec<ExecutionError>>,
    pub timestamp: DateTime<Utc>,
}

pub struct ErrorReporter {
    buffers: DashMap<Uuid, Mutex<Vec<ExecutionError>>>,
    overflow: DashMap<Uuid, AtomicU64>,
    client: reqwest::Client,
    orchestrator_url: String,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(orchestrator_url: &str) -> Self {
        Self {
            buffers: DashMap::new(),
            overflow: DashMap::new(),
            client: reqwest::Client::new(),
            orchestrator_url: orchestrator_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn report(&self, error: ExecutionError) {
        let execution_id = error.execution_id;
        let buffer = self.buffers.entry(execution_id).or_default();
        let mut buffer = buffer.lock();
        if buffer.len() >= MAX_BUFFERED_ERRORS {
            drop(buffer);
            self.overflow
                .entry(execution_id)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        buffer.push(error);
    }

    /// Errors currently buffered for an execution
    #[must_use]
    pub fn buffered_count(&self, execution_id: Uuid) -> usize {
        self.buffers
            .get(&execution_id)
            .map_or(0, |buffer| buffer.lock().len())
    }

    /// Count of errors dropped due to the buffer cap
    #[must_use]
    pub fn overflow_count(&self, execution_id: Uuid) -> u64 {
        self.overflow
            .get(&execution_id)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Drain buffers and POST them; an empty drain sends nothing
    pub async fn flush(&self) -> CrawlResult<()> {
        let mut drained: HashMap<Uuid, Vec<ExecutionError>> = HashMap::new();
        for entry in self.buffers.iter() {
            let mut buffer = entry.value().lock();
            if !buffer.is_empty() {
                drained.insert(*entry.key(), std::mem::take(&mut *buffer));
            }
        }

        if drained.is_empty() {
            return Ok(());
        }

        let batch = ErrorBatch {
            errors: drained,
            timestamp: Utc::now(),
        };
        let url = format!("{}/internal/errors/batch", self.orchestrator_url);
        let result = self.client.post(&url).json(&batch).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(
                    executions = batch.errors.len(),
                    "error batch flushed"
                );
                Ok(())
            }
            outcome => {
                match outcome {
                    Ok(response) => warn!("error batch rejected with {}", response.status()),
                    Err(e) => warn!("error batch failed: {e}"),
                }
                // Put the drained errors back, still honoring the cap
                for (execution_id, errors) in batch.errors {
                    let buffer = self.buffers.entry(execution_id).or_default();
                    let mut buffer = buffer.lock();
                    let room = MAX_BUFFERED_ERRORS.saturating_sub(buffer.len());
                    for error in errors.into_iter().take(room) {
                        buffer.push(error);
                    }
                }
                Ok(())
            }
        }
    }

    pub fn clear(&self, execution_id: Uuid) {
        self.buffers.remove(&execution_id);
        self.overflow.remove(&execution_id);
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
                    warn!("error flush loop: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn buffer_caps_and_counts_overflow() {
        let reporter = ErrorReporter::new("http://localhost:0");
        let execution = Uuid::new_v4();
        for i in 0..(MAX_BUFFERED_ERRORS + 7) {
            reporter.report(ExecutionError::new(
                execution,
                format!("https://site.test/{i}"),
                ErrorKind::Network,
                "boom",
                None,
                0,
            ));
        }
        assert_eq!(reporter.overflow_count(execution), 7);
    }
}
