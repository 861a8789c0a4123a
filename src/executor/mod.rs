//! Node graph executor: drive one phase for one URL.
//!
//! Nodes run sequentially in topological order against the task's browser
//! context. Each node gets an audit record opened at entry and closed at
//! exit; optional nodes swallow their failures, anything else halts the
//! phase. Discovered URLs and extracted items accumulate across nodes and
//! are handed back for batch enqueue/write at phase end.

pub mod graph;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::browser::BrowserContext;
use crate::error::{CrawlError, CrawlResult};
use crate::model::{
    ExtractedItem, NodeExecution, NodeExecutionStatus, Phase, TaskMessage, UrlQueueItem,
};
use crate::nodes::{DiscoveredUrl, NodeCtx, NodeRegistry};

/// A discovered URL together with the node that produced it
#[derive(Debug, Clone)]
pub struct Discovery {
    pub url: DiscoveredUrl,
    pub node_id: String,
}

/// Everything a phase run produced, kept even when the phase failed
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    pub node_executions: Vec<NodeExecution>,
    pub discoveries: Vec<Discovery>,
    pub items: Vec<ExtractedItem>,
}

/// Outer bound for one node when its params carry no `timeout_secs`
const DEFAULT_NODE_BOUND: Duration = Duration::from_secs(120);

/// Run the phase's node graph; the audit trail survives failures.
///
/// Returns the outcome plus the halting error, if any.
pub async fn run_phase(
    registry: &NodeRegistry,
    browser: &dyn BrowserContext,
    task: &TaskMessage,
    item: &UrlQueueItem,
    phase: &Phase,
    default_timeout: Duration,
) -> (PhaseOutcome, Option<CrawlError>) {
    let mut outcome = PhaseOutcome::default();

    let order = match graph::topo_order(&phase.nodes) {
        Ok(order) => order,
        Err(e) => return (outcome, Some(e)),
    };

    let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();

    for index in order {
        let node = &phase.nodes[index];
        let mut record = NodeExecution::open(
            task.execution_id,
            Some(item.id),
            &node.id,
            &node.node_type,
        );
        record.input_snapshot = Some(json!({
            "url": item.url,
            "params": node.params,
        }));
        record.retry_count = item.retry_count;

        let ctx = NodeCtx {
            browser,
            task,
            item,
            outputs: &outputs,
            registry,
            default_timeout,
        };

        let bound = node_bound(&node.params);
        let result = match tokio::time::timeout(bound, registry.execute(&ctx, node)).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::Timeout(format!(
                "node {} exceeded {}s",
                node.id,
                bound.as_secs()
            ))),
        };

        match result {
            Ok(output) => {
                record.urls_discovered_count = output.discovered_urls.len() as i32;
                record.items_extracted_count = output.extracted_items.len() as i32;
                record.output_snapshot = output.result.clone();
                record.close(NodeExecutionStatus::Completed, None);

                debug!(
                    node = %node.id,
                    discovered = output.discovered_urls.len(),
                    items = output.extracted_items.len(),
                    "node completed"
                );

                outputs.insert(
                    node.id.clone(),
                    output.result.clone().unwrap_or(serde_json::Value::Null),
                );
                for url in output.discovered_urls {
                    outcome.discoveries.push(Discovery {
                        url,
                        node_id: node.id.clone(),
                    });
                }
                for raw in output.extracted_items {
                    outcome.items.push(ExtractedItem::from_fields(
                        task.execution_id,
                        task.workflow_id,
                        item.id,
                        Some(record.id),
                        &raw.item_type,
                        raw.fields,
                    ));
                }
                outcome.node_executions.push(record);
            }
            Err(error) => {
                record.close(NodeExecutionStatus::Failed, Some(error.to_string()));
                outcome.node_executions.push(record);

                if node.optional {
                    warn!(node = %node.id, %error, "optional node failed, continuing");
                    outputs.insert(node.id.clone(), serde_json::Value::Null);
                    continue;
                }
                return (outcome, Some(error));
            }
        }
    }

    (outcome, None)
}

/// Per-node outer bound: the node's own `timeout_secs` param with headroom,
/// or the task-level default
fn node_bound(params: &serde_json::Value) -> Duration {
    params
        .get("timeout_secs")
        .and_then(serde_json::Value::as_u64)
        .map_or(DEFAULT_NODE_BOUND, |secs| {
            Duration::from_secs(secs.saturating_add(5))
        })
}

/// Convenience used by validation paths and tests
pub fn validate_phase(registry: &NodeRegistry, phase: &Phase) -> CrawlResult<()> {
    for node in &phase.nodes {
        registry.validate_node(node)?;
    }
    graph::topo_order(&phase.nodes).map(|_| ())
}
