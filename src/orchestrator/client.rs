//! Worker-side client for the orchestrator's internal endpoints.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::tracker::CompletionNotifier;

#[derive(Clone)]
pub struct OrchestratorClient {
    base_url: String,
    client: reqwest::Client,
}

impl OrchestratorClient {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionNotifier for OrchestratorClient {
    async fn execution_completed(&self, execution_id: Uuid) -> CrawlResult<()> {
        let url = format!(
            "{}/internal/executions/{execution_id}/complete",
            self.base_url
        );
        let response = self.client.post(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CrawlError::Network(format!(
                "completion signal rejected with {}",
                response.status()
            )))
        }
    }
}
