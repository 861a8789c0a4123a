//! Node library: the operations a phase graph is built from.
//!
//! Every node type registers one executor in a flat registry keyed by its
//! type tag; parameters are validated once at workflow load and again
//! defensively at execution time when they deserialize into their typed
//! structs. Executors produce a uniform `NodeOutput` regardless of kind.

pub mod control;
pub mod extract;
pub mod extract_links;
pub mod interact;
pub mod navigate;
pub mod paginate;
pub mod params;
pub mod plugin;
pub mod wait;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserContext;
use crate::error::{CrawlError, CrawlResult};
use crate::model::{NodeConfig, TaskMessage, UrlQueueItem, WorkflowConfig};

pub use plugin::{Plugin, PluginCapability, PluginInfo, PluginRegistry};

/// A URL surfaced by a discovery-capable node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    /// Marker declared by the node; absent means inherit the parent's
    pub marker: Option<String>,
}

/// A structured record surfaced by an extraction-capable node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub item_type: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Uniform node output shape
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub discovered_urls: Vec<DiscoveredUrl>,
    #[serde(default)]
    pub extracted_items: Vec<RawItem>,
}

impl NodeOutput {
    #[must_use]
    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// Fold a sub-node's output into this one (control-flow nodes)
    pub fn absorb(&mut self, other: Self) {
        self.discovered_urls.extend(other.discovered_urls);
        self.extracted_items.extend(other.extracted_items);
    }
}

/// Everything an executor may touch while running one node
pub struct NodeCtx<'a> {
    pub browser: &'a dyn BrowserContext,
    pub task: &'a TaskMessage,
    pub item: &'a UrlQueueItem,
    /// Results of completed predecessor nodes, keyed by node id
    pub outputs: &'a HashMap<String, serde_json::Value>,
    pub registry: &'a NodeRegistry,
    pub default_timeout: Duration,
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type tag this executor answers to
    fn kind(&self) -> &'static str;

    /// Configuration-time parameter validation
    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()>;

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput>;
}

/// Flat registry of executors keyed by node type tag
pub struct NodeRegistry {
    executors: HashMap<&'static str, Box<dyn NodeExecutor>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl NodeRegistry {
    /// Registry with every built-in node plus the given plugin set
    #[must_use]
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        let mut registry = Self {
            executors: HashMap::new(),
            aliases: HashMap::new(),
        };

        registry.register(Box::new(navigate::NavigateNode));
        registry.register(Box::new(wait::WaitNode));
        registry.register(Box::new(interact::ClickNode));
        registry.register(Box::new(interact::HoverNode));
        registry.register(Box::new(interact::ScrollNode));
        registry.register(Box::new(extract_links::ExtractLinksNode));
        registry.register(Box::new(extract::ExtractNode));
        registry.register(Box::new(paginate::PaginateNode));
        registry.register(Box::new(plugin::PluginNode::new(plugins)));
        registry.register(Box::new(control::SequenceNode));
        registry.register(Box::new(control::ConditionalNode));
        registry.register(Box::new(control::LoopNode));
        registry.register(Box::new(control::ParallelNode));

        // Historical spellings that resolve to the same executors
        registry.aliases.insert("wait_for", "wait");
        registry.aliases.insert("extract_text", "extract");
        registry.aliases.insert("extract_attr", "extract");
        registry.aliases.insert("extract_json", "extract");

        registry
    }

    pub fn register(&mut self, executor: Box<dyn NodeExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    fn executor(&self, node_type: &str) -> CrawlResult<&dyn NodeExecutor> {
        let resolved = self.aliases.get(node_type).copied().unwrap_or(node_type);
        self.executors
            .get(resolved)
            .map(AsRef::as_ref)
            .ok_or_else(|| CrawlError::Config(format!("unknown node type: {node_type}")))
    }

    /// Validate one node's params against its executor
    pub fn validate_node(&self, node: &NodeConfig) -> CrawlResult<()> {
        self.executor(&node.node_type)?
            .validate(&node.params)
            .map_err(|e| {
                CrawlError::Config(format!("node {} ({}): {e}", node.id, node.node_type))
            })
    }

    /// Full workflow validation: structure, params, and graph acyclicity
    pub fn validate_workflow(&self, config: &WorkflowConfig) -> CrawlResult<()> {
        config.validate_structure()?;
        for phase in &config.phases {
            for node in &phase.nodes {
                self.validate_node(node)?;
            }
            crate::executor::graph::topo_order(&phase.nodes)?;
        }
        Ok(())
    }

    /// Run one node
    pub async fn execute(
        &self,
        ctx: &NodeCtx<'_>,
        config: &NodeConfig,
    ) -> CrawlResult<NodeOutput> {
        self.executor(&config.node_type)?.execute(ctx, config).await
    }
}

/// Deserialize a node's params into their typed struct
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
) -> CrawlResult<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| CrawlError::Config(format!("invalid params: {e}")))
}
