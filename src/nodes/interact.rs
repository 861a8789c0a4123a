//! Pointer interaction nodes: click, hover, scroll.

use async_trait::async_trait;
use serde_json::json;

use crate::error::CrawlResult;
use crate::model::NodeConfig;
use crate::nodes::params::{ClickParams, HoverParams, ScrollParams};
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, parse_params};

/// Click a selector or a coordinate pair. A missing selector fails the
/// node; mark the node `optional` to tolerate absent elements.
pub struct ClickNode;

#[async_trait]
impl NodeExecutor for ClickNode {
    fn kind(&self) -> &'static str {
        "click"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<ClickParams>(params)?.validate()
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ClickParams = parse_params(&config.params)?;
        params.validate()?;

        match (&params.selector, params.x, params.y) {
            (Some(selector), _, _) => {
                ctx.browser.click(selector).await?;
                Ok(NodeOutput::with_result(json!({ "clicked": selector })))
            }
            (None, Some(x), Some(y)) => {
                ctx.browser.click_at(x, y).await?;
                Ok(NodeOutput::with_result(json!({ "clicked": [x, y] })))
            }
            _ => unreachable!("validate rejects selector-less, point-less clicks"),
        }
    }
}

pub struct HoverNode;

#[async_trait]
impl NodeExecutor for HoverNode {
    fn kind(&self) -> &'static str {
        "hover"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<HoverParams>(params).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: HoverParams = parse_params(&config.params)?;
        ctx.browser.hover(&params.selector).await?;
        Ok(NodeOutput::with_result(
            json!({ "hovered": params.selector }),
        ))
    }
}

/// Scroll an element into view, or the window by `delta_y` pixels
pub struct ScrollNode;

#[async_trait]
impl NodeExecutor for ScrollNode {
    fn kind(&self) -> &'static str {
        "scroll"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<ScrollParams>(params).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ScrollParams = parse_params(&config.params)?;
        ctx.browser
            .scroll(params.selector.as_deref(), params.delta_y)
            .await?;
        Ok(NodeOutput::with_result(json!({ "scrolled": true })))
    }
}
