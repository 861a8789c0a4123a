//! Task bus message format.
//!
//! Everything a worker needs to process one URL rides in the message:
//! the inlined phase config, the full phase list for transition resolution,
//! and the browser profiles resolved once at execution start. Workers never
//! query the profile store per task.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::browser::BrowserProfile;
use crate::model::workflow::Phase;

/// One unit of work published to the task bus, delivered at-least-once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub url: String,
    pub depth: i32,
    #[serde(default)]
    pub parent_url_id: Option<Uuid>,
    #[serde(default)]
    pub marker: String,
    pub phase_id: String,
    /// Inlined full phase object
    pub phase_config: Phase,
    #[serde(default)]
    pub workflow_config: Option<WorkflowDefaults>,
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub browser_profile_id: Option<Uuid>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub proxy_id: Option<String>,
}

/// Workflow-level defaults a worker may consult
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    #[serde(default)]
    pub default_driver: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

/// Execution-scoped context carried with every task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Full phase list, for transition resolution worker-side
    pub phases: Vec<Phase>,
    /// Resolved profiles keyed by node id; resolved once at execution start
    #[serde(default)]
    pub node_profiles: HashMap<String, BrowserProfile>,
    pub max_depth: i32,
    #[serde(default)]
    pub rate_limit_delay: i64,
}

impl TaskMessage {
    /// Resolve the browser profile for a node, falling back to the
    /// workflow-level profile keyed under the empty string
    #[must_use]
    pub fn profile_for_node(&self, node_id: &str) -> Option<&BrowserProfile> {
        self.metadata
            .node_profiles
            .get(node_id)
            .or_else(|| self.metadata.node_profiles.get(""))
    }
}
