//! Wait node: fixed delay or selector-state wait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::CrawlResult;
use crate::model::NodeConfig;
use crate::nodes::params::WaitParams;
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, parse_params};

pub struct WaitNode;

#[async_trait]
impl NodeExecutor for WaitNode {
    fn kind(&self) -> &'static str {
        "wait"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<WaitParams>(params)?.validate()
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: WaitParams = parse_params(&config.params)?;
        params.validate()?;

        if let Some(delay_ms) = params.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(selector) = &params.selector {
            ctx.browser
                .wait_for_selector(
                    selector,
                    params.state,
                    Duration::from_secs(params.timeout_secs),
                )
                .await?;
        }

        Ok(NodeOutput::with_result(json!({ "waited": true })))
    }
}
