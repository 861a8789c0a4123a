//! Topological ordering of a phase's node graph.
//!
//! Explicit `dependencies` define edges; among ready nodes the declaration
//! order decides. A phase with no declared dependencies therefore runs in
//! declaration order.

use std::collections::{HashMap, HashSet};

use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;

/// Kahn's algorithm returning indexes into `nodes`; cycles are a config error
pub fn topo_order(nodes: &[NodeConfig]) -> CrawlResult<Vec<usize>> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &node.dependencies {
            let &dep_index = index_of.get(dep.as_str()).ok_or_else(|| {
                CrawlError::Config(format!("node {} depends on unknown node {dep}", node.id))
            })?;
            if !seen.insert(dep_index) {
                continue;
            }
            in_degree[i] += 1;
            dependents[dep_index].push(i);
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

    while !ready.is_empty() {
        // Lowest declaration index first
        let next = ready
            .iter()
            .copied()
            .min()
            .unwrap_or_else(|| unreachable!("ready is non-empty"));
        ready.retain(|&i| i != next);
        order.push(next);

        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, n)| n.id.as_str())
            .collect();
        return Err(CrawlError::Config(format!(
            "dependency cycle among nodes: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, deps: &[&str]) -> NodeConfig {
        serde_json::from_value(json!({
            "id": id,
            "type": "navigate",
            "dependencies": deps,
        }))
        .expect("node config")
    }

    #[test]
    fn declaration_order_without_deps() {
        let nodes = vec![node("a", &[]), node("b", &[]), node("c", &[])];
        assert_eq!(topo_order(&nodes).expect("order"), vec![0, 1, 2]);
    }

    #[test]
    fn explicit_deps_override_declaration() {
        let nodes = vec![node("a", &["b"]), node("b", &[]), node("c", &["a"])];
        assert_eq!(topo_order(&nodes).expect("order"), vec![1, 0, 2]);
    }

    #[test]
    fn cycles_are_rejected() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        let err = topo_order(&nodes).expect_err("cycle must fail");
        assert!(err.to_string().contains("cycle"));
    }
}
