//! Navigation node.

use async_trait::async_trait;
use serde_json::json;

use crate::browser::LoadState;
use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;
use crate::nodes::params::NavigateParams;
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, parse_params};

/// Load a page and wait for the load state.
///
/// Without a `url` param the task's own URL is loaded. Non-success statuses
/// fail the node with a network-class error; the response status always
/// lands in the output metadata.
pub struct NavigateNode;

#[async_trait]
impl NodeExecutor for NavigateNode {
    fn kind(&self) -> &'static str {
        "navigate"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<NavigateParams>(params).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: NavigateParams = parse_params(&config.params)?;
        let url = params.url.as_deref().unwrap_or(&ctx.item.url);

        let response = ctx.browser.navigate(url).await?;
        ctx.browser
            .wait_for_load_state(LoadState::Load, ctx.default_timeout)
            .await?;

        if !response.is_success() {
            let status = response.status.unwrap_or(0);
            return Err(CrawlError::Http {
                status,
                url: url.to_string(),
            });
        }

        let mut output = NodeOutput::with_result(json!({
            "url": response.final_url,
            "status": response.status,
        }));
        output.metadata = Some(json!({ "status": response.status }));
        Ok(output)
    }
}
