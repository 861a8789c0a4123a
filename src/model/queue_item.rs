//! URL queue records.
//!
//! A `UrlQueueItem` is the durable unit of work: one URL in one execution,
//! unique on `(execution_id, url_hash)`, moved through its lifecycle only by
//! the queue's atomic operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrawlResult;
use crate::utils::{canonicalize_url, url_hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl QueueItemStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::str::FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown queue item status: {other}")),
        }
    }
}

/// A URL owned by an execution, at most one row per `(execution_id, url_hash)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlQueueItem {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub url: String,
    pub url_hash: String,
    /// Seeds are 0; a discovered URL is its parent's depth + 1
    pub depth: i32,
    /// Higher dequeues first
    pub priority: i32,
    pub status: QueueItemStatus,
    pub parent_url_id: Option<Uuid>,
    pub discovered_by_node: Option<String>,
    /// Routing tag set at discovery time; seeds carry the empty marker
    pub marker: String,
    pub phase_id: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub lease_held_at: Option<DateTime<Utc>>,
    pub lease_held_by: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Enqueue payload; ids, status, and lease fields are the queue's business
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub execution_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub depth: i32,
    pub priority: i32,
    pub parent_url_id: Option<Uuid>,
    pub discovered_by_node: Option<String>,
    pub marker: String,
    pub phase_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewQueueItem {
    /// Build a seed item: depth 0, empty marker, first phase
    pub fn seed(execution_id: Uuid, raw_url: &str, phase_id: &str) -> CrawlResult<Self> {
        let url = canonicalize_url(raw_url)?;
        let hash = url_hash(&url);
        Ok(Self {
            execution_id,
            url,
            url_hash: hash,
            depth: 0,
            priority: 0,
            parent_url_id: None,
            discovered_by_node: None,
            marker: String::new(),
            phase_id: Some(phase_id.to_string()),
            metadata: serde_json::Value::Null,
        })
    }

    /// Build a discovered item: parent's depth + 1, discovering node recorded
    pub fn discovered(
        execution_id: Uuid,
        raw_url: &str,
        parent: &UrlQueueItem,
        discovered_by_node: &str,
        marker: String,
        phase_id: Option<String>,
    ) -> CrawlResult<Self> {
        let url = canonicalize_url(raw_url)?;
        let hash = url_hash(&url);
        Ok(Self {
            execution_id,
            url,
            url_hash: hash,
            depth: parent.depth + 1,
            priority: 0,
            parent_url_id: Some(parent.id),
            discovered_by_node: Some(discovered_by_node.to_string()),
            marker,
            phase_id,
            metadata: serde_json::Value::Null,
        })
    }
}
