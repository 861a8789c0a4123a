//! Distributed completion tracking.
//!
//! Each worker accumulates queued/completed counts per execution in local
//! atomics and flushes the (queued − completed) delta to a shared cache
//! counter every flush window. Per-task shared writes at queue throughput
//! would saturate the cache; windowing reduces shared writes to one per
//! worker per execution per interval.
//!
//! When a flush leaves the shared counter at zero and this worker completed
//! at least one task in the window, the worker signals completion. The
//! orchestrator seeds the counter with the seed count before publishing, so
//! the counter can only reach zero once all seeds and their descendants are
//! terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::CrawlResult;

/// Shared counter key for an execution
#[must_use]
pub fn outstanding_key(execution_id: Uuid) -> String {
    format!("exec:{execution_id}:outstanding")
}

/// Stop-flag key; non-zero means workers should skip the execution's tasks
#[must_use]
pub fn stopped_key(execution_id: Uuid) -> String {
    format!("exec:{execution_id}:stopped")
}

/// Receives the completion signal; the HTTP client implements this against
/// the orchestrator's finalize endpoint
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn execution_completed(&self, execution_id: Uuid) -> CrawlResult<()>;
}

#[derive(Default)]
struct Window {
    queued: AtomicI64,
    completed: AtomicI64,
}

pub struct CompletionTracker {
    windows: DashMap<Uuid, Arc<Window>>,
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn CompletionNotifier>,
    /// Local cleanup hook fired alongside the completion signal
    on_drained: parking_lot::RwLock<Option<Box<dyn Fn(Uuid) + Send + Sync>>>,
}

impl CompletionTracker {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self {
            windows: DashMap::new(),
            cache,
            notifier,
            on_drained: parking_lot::RwLock::new(None),
        }
    }

    /// Register a hook invoked when this worker observes an execution drain;
    /// workers use it to release per-execution state (dedup filters,
    /// counters, rule attributions)
    pub fn set_on_drained(&self, hook: Box<dyn Fn(Uuid) + Send + Sync>) {
        *self.on_drained.write() = Some(hook);
    }

    fn window(&self, execution_id: Uuid) -> Arc<Window> {
        Arc::clone(
            &self
                .windows
                .entry(execution_id)
                .or_insert_with(|| Arc::new(Window::default())),
        )
    }

    /// Local atomic add; no shared write
    pub fn task_queued(&self, execution_id: Uuid, n: i64) {
        self.window(execution_id).queued.fetch_add(n, Ordering::SeqCst);
    }

    /// Local atomic add; no shared write
    pub fn task_completed(&self, execution_id: Uuid) {
        self.window(execution_id)
            .completed
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Read through to the shared counter
    pub async fn get_outstanding(&self, execution_id: Uuid) -> CrawlResult<i64> {
        Ok(self
            .cache
            .get_i64(&outstanding_key(execution_id))
            .await?
            .unwrap_or(0))
    }

    /// Drop local state and the shared counter
    pub async fn clear(&self, execution_id: Uuid) -> CrawlResult<()> {
        self.windows.remove(&execution_id);
        self.cache.del(&outstanding_key(execution_id)).await
    }

    /// Flush every execution's window once.
    ///
    /// On a cache failure the swapped counts are re-added so the next window
    /// carries them.
    pub async fn flush(&self) -> CrawlResult<()> {
        let executions: Vec<Uuid> = self.windows.iter().map(|e| *e.key()).collect();

        for execution_id in executions {
            let Some(window) = self.windows.get(&execution_id).map(|w| Arc::clone(&w)) else {
                continue;
            };
            let queued = window.queued.swap(0, Ordering::SeqCst);
            let completed = window.completed.swap(0, Ordering::SeqCst);
            if queued == 0 && completed == 0 {
                continue;
            }

            let delta = queued - completed;
            let key = outstanding_key(execution_id);
            match self.cache.incr_by(&key, delta).await {
                Ok(outstanding) => {
                    debug!(%execution_id, queued, completed, outstanding, "tracker flush");
                    // The completed > 0 guard keeps a producer-side race
                    // (queued locally but not yet flushed) from signaling a
                    // false completion
                    if outstanding == 0 && completed > 0 {
                        info!(%execution_id, "outstanding reached zero, signaling completion");
                        if let Err(e) = self.notifier.execution_completed(execution_id).await {
                            warn!(%execution_id, "completion signal failed: {e}");
                        }
                        self.windows.remove(&execution_id);
                        if let Some(hook) = &*self.on_drained.read() {
                            hook(execution_id);
                        }
                    }
                }
                Err(e) => {
                    warn!(%execution_id, "tracker flush failed, re-adding counts: {e}");
                    window.queued.fetch_add(queued, Ordering::SeqCst);
                    window.completed.fetch_add(completed, Ordering::SeqCst);
                }
            }
        }

        Ok(())
    }

    /// Background flush loop; aborts on handle drop
    pub fn spawn_flush_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = tracker.flush().await {
                    warn!("tracker flush loop: {e}");
                }
            }
        })
    }
}
