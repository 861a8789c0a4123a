//! Daemon configuration loaded from environment variables.

use std::env;
use std::time::Duration;

/// Worker daemon configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub cache_url: String,
    pub bus_subscription: String,
    pub object_store_bucket: String,
    pub orchestrator_url: String,

    /// Stable identity used for queue leases; defaults to host + random suffix
    pub worker_id: String,
    /// Concurrent task handlers
    pub concurrency: usize,

    pub lease_timeout: Duration,
    pub retry_cap: i32,
    pub default_node_timeout: Duration,

    pub stats_flush_interval: Duration,
    pub error_flush_interval: Duration,
    pub items_flush_interval: Duration,
    pub tracker_flush_interval: Duration,

    /// How long in-flight tasks get after a shutdown request
    pub shutdown_grace: Duration,
    /// Bound on the final batcher drain
    pub drain_timeout: Duration,

    pub browser_headless: bool,
    pub browser_pool_min: usize,
    pub browser_pool_max: usize,
}

impl WorkerConfig {
    /// Load from environment. Panics with a clear message when a required
    /// variable is missing; defaults apply everywhere else.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            cache_url: required_env("CACHE_URL"),
            bus_subscription: required_env("TASK_BUS_SUBSCRIPTION"),
            object_store_bucket: env::var("OBJECT_STORE_BUCKET").unwrap_or_default(),
            orchestrator_url: required_env("ORCHESTRATOR_URL"),
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            concurrency: env_parse("WORKER_CONCURRENCY", num_cpus::get().max(2)),
            lease_timeout: Duration::from_secs(env_parse("LEASE_TIMEOUT_SECS", 300)),
            retry_cap: env_parse("RETRY_CAP", 3),
            default_node_timeout: Duration::from_secs(env_parse("NODE_TIMEOUT_SECS", 30)),
            stats_flush_interval: Duration::from_secs(env_parse("STATS_FLUSH_SECS", 5)),
            error_flush_interval: Duration::from_secs(env_parse("ERROR_FLUSH_SECS", 5)),
            items_flush_interval: Duration::from_secs(env_parse("ITEMS_FLUSH_SECS", 2)),
            tracker_flush_interval: Duration::from_secs(env_parse("TRACKER_FLUSH_SECS", 5)),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 30)),
            drain_timeout: Duration::from_secs(env_parse("DRAIN_TIMEOUT_SECS", 10)),
            browser_headless: env_parse("BROWSER_HEADLESS", true),
            browser_pool_min: env_parse("BROWSER_POOL_MIN", 2),
            browser_pool_max: env_parse("BROWSER_POOL_MAX", 10),
        }
    }
}

/// Orchestrator daemon configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub cache_url: String,
    pub bus_topic: String,
    pub object_store_bucket: String,

    pub http_host: String,
    pub http_port: u16,

    pub workflow_cache_ttl: Duration,
    pub lease_timeout: Duration,
    /// Interval of the background stale-lease sweep
    pub stale_sweep_interval: Duration,
    /// Executions exceeding this error ratio are finalized as failed
    pub error_rate_threshold: f64,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            cache_url: required_env("CACHE_URL"),
            bus_topic: required_env("TASK_BUS_SUBSCRIPTION"),
            object_store_bucket: env::var("OBJECT_STORE_BUCKET").unwrap_or_default(),
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_parse("HTTP_PORT", 8080),
            workflow_cache_ttl: Duration::from_secs(env_parse("WORKFLOW_CACHE_TTL_SECS", 3600)),
            lease_timeout: Duration::from_secs(env_parse("LEASE_TIMEOUT_SECS", 300)),
            stale_sweep_interval: Duration::from_secs(env_parse("STALE_SWEEP_SECS", 60)),
            error_rate_threshold: env_parse("ERROR_RATE_THRESHOLD", 0.5),
        }
    }

    /// Log connection targets with credentials elided
    pub fn log_redacted(&self) {
        for (name, value) in [
            ("DATABASE_URL", &self.database_url),
            ("CACHE_URL", &self.cache_url),
        ] {
            tracing::info!("{name} = ({} chars)", value.len());
        }
        tracing::info!("TASK_BUS_SUBSCRIPTION = {}", self.bus_topic);
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn default_worker_id() -> String {
    let host = env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}
