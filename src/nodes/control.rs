//! Control-flow nodes: sequence, conditional, loop, parallel.
//!
//! These wrap sub-node lists and delegate back to the registry, folding the
//! sub-outputs (discovered URLs, extracted items) into their own output.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::CrawlResult;
use crate::model::NodeConfig;
use crate::nodes::params::{ConditionalParams, LoopParams, ParallelParams, SequenceParams};
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, parse_params};

/// Run sub-nodes in declared order; the first failure aborts the sequence
pub struct SequenceNode;

#[async_trait]
impl NodeExecutor for SequenceNode {
    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        let params: SequenceParams = parse_params(params)?;
        validate_subnodes(&params.nodes)
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: SequenceParams = parse_params(&config.params)?;
        let mut output = NodeOutput::default();
        let mut results = Vec::with_capacity(params.nodes.len());

        for sub in &params.nodes {
            let sub_output = ctx.registry.execute(ctx, sub).await?;
            results.push(sub_output.result.clone().unwrap_or(Value::Null));
            output.absorb(sub_output);
        }

        output.result = Some(Value::Array(results));
        Ok(output)
    }
}

/// Branch on an expression over accumulated node outputs
pub struct ConditionalNode;

#[async_trait]
impl NodeExecutor for ConditionalNode {
    fn kind(&self) -> &'static str {
        "conditional"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        let params: ConditionalParams = parse_params(params)?;
        validate_subnodes(&params.then_nodes)?;
        validate_subnodes(&params.else_nodes)
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ConditionalParams = parse_params(&config.params)?;

        let taken = evaluate_condition(&params.condition, ctx.outputs);
        debug!(condition = %params.condition, taken, "conditional branch");

        let branch = if taken {
            &params.then_nodes
        } else {
            &params.else_nodes
        };

        let mut output = NodeOutput::default();
        for sub in branch {
            let sub_output = ctx.registry.execute(ctx, sub).await?;
            output.absorb(sub_output);
        }
        output.result = Some(json!({ "condition": taken }));
        Ok(output)
    }
}

/// Repeat sub-nodes up to `max_iterations` times
pub struct LoopNode;

#[async_trait]
impl NodeExecutor for LoopNode {
    fn kind(&self) -> &'static str {
        "loop"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        let params: LoopParams = parse_params(params)?;
        params.validate()?;
        validate_subnodes(&params.nodes)
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: LoopParams = parse_params(&config.params)?;
        params.validate()?;

        let mut output = NodeOutput::default();
        let mut iterations = 0u32;
        for _ in 0..params.max_iterations {
            iterations += 1;
            for sub in &params.nodes {
                let sub_output = ctx.registry.execute(ctx, sub).await?;
                output.absorb(sub_output);
            }
        }
        output.result = Some(json!({ "iterations": iterations }));
        Ok(output)
    }
}

/// Run sub-nodes concurrently with bounded fan-out over the shared context
pub struct ParallelNode;

#[async_trait]
impl NodeExecutor for ParallelNode {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        let params: ParallelParams = parse_params(params)?;
        validate_subnodes(&params.nodes)
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ParallelParams = parse_params(&config.params)?;
        let concurrency = params.max_concurrent.max(1);

        let mut output = NodeOutput::default();
        let mut pending = params.nodes.iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < concurrency {
                match pending.next() {
                    Some(sub) => in_flight.push(ctx.registry.execute(ctx, sub)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(result) => output.absorb(result?),
                None => break,
            }
        }

        output.result = Some(json!({ "branches": params.nodes.len() }));
        Ok(output)
    }
}

fn validate_subnodes(nodes: &[NodeConfig]) -> CrawlResult<()> {
    // Sub-node params are validated by their own executors at workflow load;
    // here only the shape needs to hold
    if nodes.iter().any(|n| n.id.is_empty()) {
        return Err(crate::error::CrawlError::Config(
            "sub-node without id".into(),
        ));
    }
    Ok(())
}

/// Tiny condition language over accumulated outputs.
///
/// `a.b == "x"` / `a.b != "x"` compare a dotted output path against a
/// literal; a bare path tests truthiness (present, non-null, non-false,
/// non-empty).
pub(crate) fn evaluate_condition(expr: &str, outputs: &HashMap<String, Value>) -> bool {
    let expr = expr.trim();

    for (op, negate) in [("==", false), ("!=", true)] {
        if let Some((lhs, rhs)) = expr.split_once(op) {
            let actual = lookup_path(lhs.trim(), outputs);
            let expected = parse_literal(rhs.trim());
            let equal = actual.as_ref() == Some(&expected);
            return equal != negate;
        }
    }

    match lookup_path(expr, outputs) {
        Some(Value::Null) | None => false,
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

fn lookup_path(path: &str, outputs: &HashMap<String, Value>) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = outputs.get(root)?.clone();
    for segment in segments {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

fn parse_literal(raw: &str) -> Value {
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    if let Some(s) = unquoted {
        return Value::String(s.to_string());
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("nav", json!({ "status": 200, "url": "https://x" }));
        map.insert("links", json!({ "links": [] }));
        map.into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn equality_and_inequality() {
        let outputs = outputs();
        assert!(evaluate_condition("nav.status == 200", &outputs));
        assert!(evaluate_condition("nav.url == \"https://x\"", &outputs));
        assert!(evaluate_condition("nav.status != 404", &outputs));
        assert!(!evaluate_condition("nav.status == 404", &outputs));
    }

    #[test]
    fn truthiness() {
        let outputs = outputs();
        assert!(evaluate_condition("nav.status", &outputs));
        assert!(!evaluate_condition("links.links", &outputs));
        assert!(!evaluate_condition("missing.path", &outputs));
    }
}
