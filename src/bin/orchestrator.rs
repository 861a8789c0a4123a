// Orchestrator daemon.
//
// Owns workflow and execution records, serves the internal batch endpoints,
// and runs the background stale-lease sweep. Workers are separate
// processes; see crawlgrid-worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawlgrid::bus::RedisTaskBus;
use crawlgrid::cache::RedisCache;
use crawlgrid::config::OrchestratorConfig;
use crawlgrid::nodes::{NodeRegistry, PluginRegistry};
use crawlgrid::orchestrator::{AppState, ExecutionService, build_router};
use crawlgrid::queue::PgUrlQueue;
use crawlgrid::store::{
    self, CachedWorkflows, ErrorStore, ExecutionStore, ProfileStore, WorkflowStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OrchestratorConfig::from_env();
    config.log_redacted();

    let pool = store::connect(&config.database_url)
        .await
        .context("database connection failed")?;
    store::ensure_schema(&pool)
        .await
        .context("schema bootstrap failed")?;

    let cache = Arc::new(
        RedisCache::connect(&config.cache_url)
            .await
            .context("cache connection failed")?,
    );

    let queue = Arc::new(PgUrlQueue::with_lease_timeout(
        pool.clone(),
        config.lease_timeout,
    ));

    let bus = Arc::new(
        RedisTaskBus::connect(&config.cache_url, &config.bus_topic)
            .await
            .context("task bus connection failed")?,
    );

    let registry = Arc::new(NodeRegistry::new(Arc::new(PluginRegistry::new())));
    let workflows = CachedWorkflows::new(WorkflowStore::new(pool.clone()), config.workflow_cache_ttl);
    let executions = ExecutionStore::new(pool.clone());
    let errors = ErrorStore::new(pool.clone());
    let profiles = ProfileStore::new(pool.clone());

    let service = Arc::new(ExecutionService::new(
        workflows,
        executions.clone(),
        profiles,
        queue,
        bus,
        cache,
        registry,
        config.error_rate_threshold,
    ));

    let _sweep = service.spawn_stale_sweep(config.stale_sweep_interval, config.lease_timeout);

    let state = AppState {
        executions,
        errors,
        service,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("orchestrator listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    Ok(())
}
