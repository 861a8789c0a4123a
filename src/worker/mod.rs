//! Worker daemon: bounded concurrent task handlers over a bus subscription.
//!
//! The loop fills up to `concurrency` in-flight handlers and backfills as
//! they finish. Shutdown stops the subscription, gives in-flight tasks a
//! grace window, then drains every batcher. A task cancelled mid-flight is
//! neither completed nor failed; its lease expires and another worker
//! picks it up.

pub mod handler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::browser::BrowserProvider;
use crate::bus::TaskBus;
use crate::cache::Cache;
use crate::config::WorkerConfig;
use crate::error::CrawlResult;
use crate::limiter::DomainRateLimiter;
use crate::nodes::NodeRegistry;
use crate::queue::{UrlDeduplicator, UrlQueue};
use crate::recovery::RecoveryEngine;
use crate::store::NodeExecutionSink;
use crate::telemetry::{BatchedItemWriter, ErrorReporter, StatsReporter};
use crate::tracker::{CompletionTracker, stopped_key};

/// Worker tuning, separable from env loading for tests
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub concurrency: usize,
    pub default_node_timeout: Duration,
    pub shutdown_grace: Duration,
    pub drain_timeout: Duration,
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            concurrency: config.concurrency,
            default_node_timeout: config.default_node_timeout,
            shutdown_grace: config.shutdown_grace,
            drain_timeout: config.drain_timeout,
        }
    }
}

/// Shared state of one worker process
pub struct WorkerInner {
    pub options: WorkerOptions,
    pub queue: Arc<dyn UrlQueue>,
    pub bus: Arc<dyn TaskBus>,
    pub cache: Arc<dyn Cache>,
    pub browser: Arc<dyn BrowserProvider>,
    pub registry: Arc<NodeRegistry>,
    pub dedup: Arc<UrlDeduplicator>,
    pub tracker: Arc<CompletionTracker>,
    pub stats: Arc<StatsReporter>,
    pub errors: Arc<ErrorReporter>,
    pub items: Arc<BatchedItemWriter>,
    pub recovery: Arc<RecoveryEngine>,
    pub limiter: DomainRateLimiter,
    /// Audit-row sink; absent in storeless setups
    pub node_executions: Option<Arc<dyn NodeExecutionSink>>,
    /// Intake pause deadline set by add_delay recovery actions
    pause_until: parking_lot::Mutex<Option<Instant>>,
}

impl WorkerInner {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        options: WorkerOptions,
        queue: Arc<dyn UrlQueue>,
        bus: Arc<dyn TaskBus>,
        cache: Arc<dyn Cache>,
        browser: Arc<dyn BrowserProvider>,
        registry: Arc<NodeRegistry>,
        dedup: Arc<UrlDeduplicator>,
        tracker: Arc<CompletionTracker>,
        stats: Arc<StatsReporter>,
        errors: Arc<ErrorReporter>,
        items: Arc<BatchedItemWriter>,
        recovery: Arc<RecoveryEngine>,
        node_executions: Option<Arc<dyn NodeExecutionSink>>,
    ) -> Self {
        Self {
            options,
            queue,
            bus,
            cache,
            browser,
            registry,
            dedup,
            tracker,
            stats,
            errors,
            items,
            recovery,
            limiter: DomainRateLimiter::new(),
            node_executions,
            pause_until: parking_lot::Mutex::new(None),
        }
    }

    /// True when the orchestrator flagged the execution stopped
    pub async fn is_execution_stopped(&self, execution_id: Uuid) -> bool {
        match self.cache.get_i64(&stopped_key(execution_id)).await {
            Ok(flag) => flag.unwrap_or(0) > 0,
            Err(e) => {
                warn!(%execution_id, "stop-flag check failed: {e}");
                false
            }
        }
    }

    /// Pause this worker's intake (add_delay recovery action)
    pub fn pause_intake(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut pause = self.pause_until.lock();
        *pause = Some(pause.map_or(deadline, |existing| existing.max(deadline)));
    }

    fn intake_pause_remaining(&self) -> Option<Duration> {
        let mut pause = self.pause_until.lock();
        match *pause {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    *pause = None;
                    None
                } else {
                    Some(deadline - now)
                }
            }
            None => None,
        }
    }
}

pub struct Worker {
    inner: Arc<WorkerInner>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl Worker {
    #[must_use]
    pub fn new(inner: Arc<WorkerInner>) -> Self {
        Self {
            inner,
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for signaling shutdown from outside the run loop
    #[must_use]
    pub fn shutdown_handle(&self) -> WorkerShutdown {
        WorkerShutdown {
            notify: Arc::clone(&self.shutdown),
            flag: Arc::clone(&self.shutting_down),
        }
    }

    /// Subscribe and process until shutdown, then drain
    pub async fn run(&self) -> CrawlResult<()> {
        let mut subscription = self.inner.bus.subscribe().await?;
        let mut in_flight = FuturesUnordered::new();
        let concurrency = self.inner.options.concurrency.max(1);

        info!(
            worker_id = %self.inner.options.worker_id,
            concurrency,
            "worker started"
        );

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            // Honor an intake pause before pulling more work
            if let Some(remaining) = self.inner.intake_pause_remaining() {
                tokio::select! {
                    () = tokio::time::sleep(remaining) => {}
                    () = self.shutdown.notified() => break,
                }
                continue;
            }

            if in_flight.len() >= concurrency {
                // Wait for a slot
                tokio::select! {
                    _ = in_flight.next() => {}
                    () = self.shutdown.notified() => break,
                }
                continue;
            }

            tokio::select! {
                delivery = subscription.next() => {
                    let Some(delivery) = delivery else { break };
                    let inner = Arc::clone(&self.inner);
                    let shutdown = Arc::clone(&self.shutdown);
                    in_flight.push(tokio::spawn(async move {
                        handler::handle_delivery(inner, delivery, shutdown).await;
                    }));
                }
                _ = in_flight.next(), if !in_flight.is_empty() => {}
                () = self.shutdown.notified() => break,
            }
        }

        info!("worker stopping, waiting for in-flight tasks");
        let grace = self.inner.options.shutdown_grace;
        let drain_in_flight = async {
            while let Some(result) = in_flight.next().await {
                if let Err(e) = result {
                    warn!("task handler panicked: {e}");
                }
            }
        };
        if tokio::time::timeout(grace, drain_in_flight).await.is_err() {
            warn!("in-flight tasks exceeded grace period, abandoning");
        }

        self.drain_batchers().await;
        info!("worker exited cleanly");
        Ok(())
    }

    /// Final flush of every batcher, bounded by the drain timeout
    async fn drain_batchers(&self) {
        let inner = Arc::clone(&self.inner);
        let drain = async move {
            if let Err(e) = inner.stats.flush().await {
                warn!("final stats drain: {e}");
            }
            if let Err(e) = inner.errors.flush().await {
                warn!("final errors drain: {e}");
            }
            if let Err(e) = inner.items.flush().await {
                warn!("final items drain: {e}");
            }
            if let Err(e) = inner.tracker.flush().await {
                warn!("final tracker drain: {e}");
            }
        };
        if tokio::time::timeout(self.inner.options.drain_timeout, drain)
            .await
            .is_err()
        {
            warn!("batcher drain exceeded its bound");
        }
    }
}

/// Clonable shutdown signal
#[derive(Clone)]
pub struct WorkerShutdown {
    notify: Arc<Notify>,
    flag: Arc<AtomicBool>,
}

impl WorkerShutdown {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
