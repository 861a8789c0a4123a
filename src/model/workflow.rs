//! Workflow definition: the immutable config a user submits.
//!
//! The JSON wire format is deserialized straight into these types; structural
//! validation lives here, node parameter validation lives in the node
//! registry where the per-type schemas are.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};

/// A stored workflow: id, lifecycle status, and the immutable config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub config: WorkflowConfig,
    /// Workflow-level browser profile, applied where no node override exists
    pub browser_profile_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Paused,
    Archived,
}

impl WorkflowStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// Workflow configuration wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub start_urls: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,
    /// Milliseconds between operations against the same domain
    #[serde(default)]
    pub rate_limit_delay: i64,
    /// Informational; workers pick their own engine
    #[serde(default)]
    pub default_driver: Option<String>,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

const fn default_max_depth() -> i32 {
    3
}

/// Ordered group of nodes a URL routed to this phase runs through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PhaseKind,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub url_filter: Option<UrlFilter>,
    #[serde(default)]
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Discovery,
    Extraction,
}

/// Eligibility filter evaluated by the phase router.
///
/// A specified `depth` must match the item's depth exactly; specified
/// `markers` must contain the item's marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlFilter {
    #[serde(default)]
    pub depth: Option<i32>,
    #[serde(default)]
    pub markers: Option<HashSet<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub condition: TransitionCondition,
    pub next_phase: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCondition {
    #[default]
    AllNodesComplete,
}

/// One node inside a phase.
///
/// `dependencies` names explicit predecessors; in their absence the phase's
/// declared order is the dependency order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional nodes swallow failures; the phase continues with a null result
    #[serde(default)]
    pub optional: bool,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl NodeConfig {
    /// Display name for logs and audit rows
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl WorkflowConfig {
    /// Parse the JSON wire format and run structural validation
    pub fn from_json(raw: &serde_json::Value) -> CrawlResult<Self> {
        let config: Self = serde_json::from_value(raw.clone())
            .map_err(|e| CrawlError::Config(format!("malformed workflow config: {e}")))?;
        config.validate_structure()?;
        Ok(config)
    }

    /// Structural validation: seeds, phases, nodes, references.
    ///
    /// Node parameter validation is the registry's job and runs separately.
    pub fn validate_structure(&self) -> CrawlResult<()> {
        if self.start_urls.is_empty() {
            return Err(CrawlError::Config("workflow has no start_urls".into()));
        }
        if self.phases.is_empty() {
            return Err(CrawlError::Config("workflow has no phases".into()));
        }
        if self.max_depth < 0 {
            return Err(CrawlError::Config("max_depth must be non-negative".into()));
        }

        let mut phase_ids = HashSet::new();
        for phase in &self.phases {
            if !phase_ids.insert(phase.id.as_str()) {
                return Err(CrawlError::Config(format!(
                    "duplicate phase id {}",
                    phase.id
                )));
            }
            if phase.nodes.is_empty() {
                return Err(CrawlError::Config(format!(
                    "phase {} has no nodes",
                    phase.id
                )));
            }

            let node_ids: HashSet<&str> = phase.nodes.iter().map(|n| n.id.as_str()).collect();
            if node_ids.len() != phase.nodes.len() {
                return Err(CrawlError::Config(format!(
                    "phase {} has duplicate node ids",
                    phase.id
                )));
            }
            for node in &phase.nodes {
                for dep in &node.dependencies {
                    if !node_ids.contains(dep.as_str()) {
                        return Err(CrawlError::Config(format!(
                            "node {} depends on unknown node {dep}",
                            node.id
                        )));
                    }
                }
            }
        }

        for phase in &self.phases {
            if let Some(transition) = &phase.transition
                && !phase_ids.contains(transition.next_phase.as_str())
            {
                return Err(CrawlError::Config(format!(
                    "phase {} transitions to unknown phase {}",
                    phase.id, transition.next_phase
                )));
            }
        }

        Ok(())
    }

    /// Look up a phase by id
    #[must_use]
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// The first phase; validation guarantees at least one exists
    pub fn first_phase(&self) -> CrawlResult<&Phase> {
        self.phases
            .first()
            .ok_or_else(|| CrawlError::Config("workflow has no phases".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_config() -> serde_json::Value {
        json!({
            "start_urls": ["https://example.com"],
            "phases": [{
                "id": "extract",
                "type": "extraction",
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "fields", "type": "extract", "params": {"fields": {"title": {"selector": "h1"}}}}
                ]
            }]
        })
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = WorkflowConfig::from_json(&minimal_config()).expect("valid config");
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.rate_limit_delay, 0);
        assert_eq!(config.phases.len(), 1);
        assert_eq!(config.phases[0].kind, PhaseKind::Extraction);
    }

    #[test]
    fn rejects_empty_seeds() {
        let mut raw = minimal_config();
        raw["start_urls"] = json!([]);
        assert!(WorkflowConfig::from_json(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_transition_target() {
        let mut raw = minimal_config();
        raw["phases"][0]["transition"] = json!({"next_phase": "nope"});
        assert!(WorkflowConfig::from_json(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut raw = minimal_config();
        raw["phases"][0]["nodes"][1]["dependencies"] = json!(["ghost"]);
        assert!(WorkflowConfig::from_json(&raw).is_err());
    }
}
