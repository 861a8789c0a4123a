//! Plugin nodes.
//!
//! A plugin is an in-process unit obeying the discovery or extraction
//! contract: it validates its own config against a declared schema and
//! produces the same output shape as the built-in nodes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;
use crate::nodes::params::PluginParams;
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, parse_params};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCapability {
    /// Produces discovered URLs
    Discovery,
    /// Produces extracted items
    Extraction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub capability: PluginCapability,
    #[serde(default)]
    pub description: String,
}

/// The loadable unit contract
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// JSON schema describing the accepted config
    fn config_schema(&self) -> serde_json::Value;

    /// Config validation at workflow load
    fn validate(&self, config: &serde_json::Value) -> CrawlResult<()>;

    async fn execute(
        &self,
        ctx: &NodeCtx<'_>,
        config: &serde_json::Value,
    ) -> CrawlResult<NodeOutput>;
}

/// Loaded plugins keyed by name
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.info().name, plugin);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).map(|p| Arc::clone(&p))
    }

    #[must_use]
    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|p| p.info()).collect()
    }
}

/// Node executor delegating to a registered plugin
pub struct PluginNode {
    registry: Arc<PluginRegistry>,
}

impl PluginNode {
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeExecutor for PluginNode {
    fn kind(&self) -> &'static str {
        "plugin"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        let params: PluginParams = parse_params(params)?;
        let plugin = self
            .registry
            .get(&params.plugin)
            .ok_or_else(|| CrawlError::Config(format!("unknown plugin: {}", params.plugin)))?;
        plugin.validate(&params.config)
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: PluginParams = parse_params(&config.params)?;
        let plugin = self
            .registry
            .get(&params.plugin)
            .ok_or_else(|| CrawlError::Config(format!("unknown plugin: {}", params.plugin)))?;
        plugin.execute(ctx, &params.config).await
    }
}
