//! Execution records and the execution error log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub urls_processed: i64,
    pub urls_discovered: i64,
    pub items_extracted: i64,
    pub errors: i64,
    /// Processed-count breakdown per phase id
    #[serde(default)]
    pub phase_stats: HashMap<String, i64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Terminal states never transition again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One logged error, buffered worker-side and flushed in batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub url: String,
    pub error_type: ErrorKind,
    pub message: String,
    pub phase_id: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl ExecutionError {
    #[must_use]
    pub fn new(
        execution_id: Uuid,
        url: impl Into<String>,
        error_type: ErrorKind,
        message: impl Into<String>,
        phase_id: Option<String>,
        retry_count: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            url: url.into(),
            error_type,
            message: message.into(),
            phase_id,
            retry_count,
            created_at: Utc::now(),
        }
    }
}
