//! crawlgrid: a distributed web-crawl workflow engine.
//!
//! Workflows run as a pipeline of phases over a durable URL queue. The
//! orchestrator seeds executions and owns their lifecycle; workers pull
//! tasks off the bus, run each phase's node graph against a pooled browser
//! context, and report through batched telemetry. See the daemon binaries
//! for wiring.

pub mod browser;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod model;
pub mod nodes;
pub mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod utils;
pub mod worker;

pub use browser::{BrowserContext, BrowserPool, BrowserPoolConfig, BrowserProfile, BrowserProvider};
pub use bus::{MemoryTaskBus, TaskBus};
pub use cache::{Cache, MemoryCache, RedisCache};
pub use config::{OrchestratorConfig, WorkerConfig};
pub use error::{CrawlError, CrawlResult, ErrorKind};
pub use model::{
    Execution, ExecutionStatus, ExtractedItem, NodeExecution, Phase, TaskMessage, UrlQueueItem,
    Workflow, WorkflowConfig,
};
pub use nodes::{NodeRegistry, Plugin, PluginRegistry};
pub use queue::{MemoryUrlQueue, PgUrlQueue, UrlDeduplicator, UrlQueue};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use router::{RouteDecision, route};
pub use tracker::CompletionTracker;
pub use worker::{Worker, WorkerInner};
