//! Per-node audit records.
//!
//! A `NodeExecution` row is opened when the executor enters a node and
//! closed exactly once when the node exits; it is never mutated afterward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeExecutionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for NodeExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown node execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub url_queue_item_id: Option<Uuid>,
    pub node_id: String,
    pub node_type: String,
    pub status: NodeExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input_snapshot: Option<serde_json::Value>,
    pub output_snapshot: Option<serde_json::Value>,
    pub urls_discovered_count: i32,
    pub items_extracted_count: i32,
    pub error: Option<String>,
    pub retry_count: i32,
}

impl NodeExecution {
    /// Open a record at node entry
    #[must_use]
    pub fn open(
        execution_id: Uuid,
        url_queue_item_id: Option<Uuid>,
        node_id: &str,
        node_type: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            url_queue_item_id,
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: NodeExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            input_snapshot: None,
            output_snapshot: None,
            urls_discovered_count: 0,
            items_extracted_count: 0,
            error: None,
            retry_count: 0,
        }
    }

    /// Close the record; `completed_at` is clamped to never precede `started_at`
    pub fn close(&mut self, status: NodeExecutionStatus, error: Option<String>) {
        let now = Utc::now().max(self.started_at);
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_sets_terminal_fields() {
        let mut rec = NodeExecution::open(Uuid::new_v4(), None, "nav", "navigate");
        assert_eq!(rec.status, NodeExecutionStatus::Running);
        assert!(rec.completed_at.is_none());

        rec.close(NodeExecutionStatus::Completed, None);
        let completed_at = rec.completed_at.expect("completed_at set on close");
        assert!(completed_at >= rec.started_at);
        assert!(rec.duration_ms.expect("duration set on close") >= 0);
    }
}
