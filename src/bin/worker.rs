// Worker daemon.
//
// Subscribes to the task bus and runs phase node graphs against pooled
// browser contexts. Scale horizontally by running more replicas; the
// queue's lease discipline keeps them from stepping on each other.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawlgrid::browser::{BrowserPool, BrowserPoolConfig};
use crawlgrid::bus::RedisTaskBus;
use crawlgrid::cache::{Cache, RedisCache};
use crawlgrid::config::WorkerConfig;
use crawlgrid::nodes::{NodeRegistry, PluginRegistry};
use crawlgrid::orchestrator::OrchestratorClient;
use crawlgrid::queue::{PgUrlQueue, UrlDeduplicator, UrlQueue};
use crawlgrid::recovery::{DomainBlockList, NoopAdvisor, ProxyPool, RecoveryEngine};
use crawlgrid::store::{self, NodeExecutionStore};
use crawlgrid::telemetry::{
    BatchedItemWriter, ErrorReporter, ItemSink, PgInsertItemWriter, StatsReporter,
};
use crawlgrid::tracker::{CompletionNotifier, CompletionTracker};
use crawlgrid::worker::{Worker, WorkerInner, WorkerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,chromiumoxide=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(worker_id = %config.worker_id, "worker configuration loaded");

    let pool = store::connect(&config.database_url)
        .await
        .context("database connection failed")?;
    store::ensure_schema(&pool)
        .await
        .context("schema bootstrap failed")?;

    let cache: Arc<dyn Cache> = Arc::new(
        RedisCache::connect(&config.cache_url)
            .await
            .context("cache connection failed")?,
    );
    let bus = Arc::new(
        RedisTaskBus::connect(&config.cache_url, &config.bus_subscription)
            .await
            .context("task bus connection failed")?,
    );

    let queue: Arc<dyn UrlQueue> = Arc::new(PgUrlQueue::with_lease_timeout(
        pool.clone(),
        config.lease_timeout,
    ));

    let browser_pool = Arc::new(BrowserPool::new(BrowserPoolConfig {
        min_pool_size: config.browser_pool_min,
        max_pool_size: config.browser_pool_max,
        headless: config.browser_headless,
        ..BrowserPoolConfig::default()
    }));
    browser_pool
        .start()
        .await
        .context("browser pool startup failed")?;

    let registry = Arc::new(NodeRegistry::new(Arc::new(PluginRegistry::new())));
    let dedup = Arc::new(UrlDeduplicator::exact_on_collision(Arc::clone(&cache)));

    let notifier: Arc<dyn CompletionNotifier> =
        Arc::new(OrchestratorClient::new(&config.orchestrator_url));
    let tracker = Arc::new(CompletionTracker::new(Arc::clone(&cache), notifier));

    let stats = Arc::new(StatsReporter::new(
        &config.orchestrator_url,
        &config.worker_id,
    ));
    let errors = Arc::new(ErrorReporter::new(&config.orchestrator_url));
    let item_sink: Arc<dyn ItemSink> = Arc::new(PgInsertItemWriter::new(pool.clone()));
    let items = Arc::new(BatchedItemWriter::new(item_sink));

    let recovery = Arc::new(RecoveryEngine::new(
        Arc::new(DomainBlockList::new()),
        ProxyPool::new(Vec::new()),
        Arc::new(NoopAdvisor),
        config.retry_cap,
    ));

    // Release per-execution state once this worker sees an execution drain
    {
        let dedup = Arc::clone(&dedup);
        let stats = Arc::clone(&stats);
        let errors = Arc::clone(&errors);
        let recovery = Arc::clone(&recovery);
        tracker.set_on_drained(Box::new(move |execution_id| {
            dedup.clear(execution_id);
            stats.clear(execution_id);
            errors.clear(execution_id);
            recovery.clear(execution_id);
        }));
    }

    let _tracker_loop = tracker.spawn_flush_loop(config.tracker_flush_interval);
    let _stats_loop = stats.spawn_flush_loop(config.stats_flush_interval);
    let _errors_loop = errors.spawn_flush_loop(config.error_flush_interval);
    let _items_loop = items.spawn_flush_loop(config.items_flush_interval);

    let inner = Arc::new(WorkerInner::new(
        WorkerOptions::from(&config),
        queue,
        bus,
        cache,
        browser_pool.clone(),
        registry,
        dedup,
        tracker,
        stats,
        errors,
        items,
        recovery,
        Some(Arc::new(NodeExecutionStore::new(pool))),
    ));

    let worker = Worker::new(inner);
    let shutdown = worker.shutdown_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown.shutdown();
    });

    worker.run().await.context("worker run loop failed")?;

    browser_pool.shutdown().await;
    Ok(())
}
