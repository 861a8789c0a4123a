//! Pagination node.
//!
//! Walks next-page controls up to `max_pages`, optionally harvesting links
//! from every page visited along the way.

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use crate::browser::{LoadState, Locator};
use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;
use crate::nodes::extract_links::collect_links;
use crate::nodes::params::{ExtractLinksParams, PaginateParams};
use crate::nodes::{DiscoveredUrl, NodeCtx, NodeExecutor, NodeOutput, parse_params};

pub struct PaginateNode;

#[async_trait]
impl NodeExecutor for PaginateNode {
    fn kind(&self) -> &'static str {
        "paginate"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<PaginateParams>(params)?.validate()
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: PaginateParams = parse_params(&config.params)?;
        params.validate()?;

        let link_params = params.link_selector.as_ref().map(|sel| ExtractLinksParams {
            selector: sel.clone(),
            limit: 0,
            marker: params.marker.clone(),
            filter: None,
        });

        let mut discovered = Vec::new();
        let mut pages_visited = 1u32;

        loop {
            if let Some(link_params) = &link_params {
                let base = Url::parse(&ctx.browser.current_url().await?)
                    .map_err(|e| CrawlError::Parse(format!("current url: {e}")))?;
                for url in collect_links(ctx.browser, link_params, &base).await? {
                    discovered.push(DiscoveredUrl {
                        url,
                        marker: params.marker.clone(),
                    });
                }
            }

            if pages_visited >= params.max_pages {
                break;
            }

            // A vanished next control means the listing ran out
            if Locator::new(ctx.browser, &params.selector).count().await? == 0 {
                break;
            }

            let before = ctx.browser.current_url().await?;
            ctx.browser.click(&params.selector).await?;
            ctx.browser
                .wait_for_load_state(LoadState::Load, ctx.default_timeout)
                .await?;

            if ctx.browser.current_url().await? == before {
                break;
            }
            pages_visited += 1;
        }

        let mut output = NodeOutput::with_result(json!({
            "pages_visited": pages_visited,
            "links": discovered.len(),
        }));
        output.discovered_urls = discovered;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserProvider, StaticBrowser, StaticSite};
    use crate::model::{TaskMessage, UrlQueueItem};
    use crate::nodes::{NodeRegistry, PluginRegistry};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn paged_site() -> Arc<StaticSite> {
        let site = StaticSite::new();
        site.add_page(
            "https://site.test/list",
            r#"<a class="item" href="/p/1">1</a><a class="next" href="/list?page=2">next</a>"#,
        );
        site.add_page(
            "https://site.test/list?page=2",
            r#"<a class="item" href="/p/2">2</a><a class="next" href="/list?page=3">next</a>"#,
        );
        site.add_page(
            "https://site.test/list?page=3",
            r#"<a class="item" href="/p/3">3</a>"#,
        );
        Arc::new(site)
    }

    fn queue_item(url: &str) -> UrlQueueItem {
        use crate::model::QueueItemStatus;
        use chrono::Utc;
        use uuid::Uuid;
        UrlQueueItem {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            url: url.to_string(),
            url_hash: "0".into(),
            depth: 0,
            priority: 0,
            status: QueueItemStatus::Processing,
            parent_url_id: None,
            discovered_by_node: None,
            marker: String::new(),
            phase_id: None,
            retry_count: 0,
            last_error: None,
            skip_reason: None,
            created_at: Utc::now(),
            processed_at: None,
            lease_held_at: None,
            lease_held_by: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn task_for(item: &UrlQueueItem) -> TaskMessage {
        use crate::model::{Phase, PhaseKind, TaskMetadata};
        let phase = Phase {
            id: "p".into(),
            kind: PhaseKind::Discovery,
            name: "p".into(),
            nodes: vec![],
            url_filter: None,
            transition: None,
        };
        TaskMessage {
            task_id: uuid::Uuid::new_v4(),
            execution_id: item.execution_id,
            workflow_id: uuid::Uuid::new_v4(),
            url: item.url.clone(),
            depth: item.depth,
            parent_url_id: None,
            marker: String::new(),
            phase_id: "p".into(),
            phase_config: phase.clone(),
            workflow_config: None,
            metadata: TaskMetadata {
                phases: vec![phase],
                node_profiles: HashMap::new(),
                max_depth: 3,
                rate_limit_delay: 0,
            },
            retry_count: 0,
            browser_profile_id: None,
            proxy_url: None,
            proxy_id: None,
        }
    }

    #[tokio::test]
    async fn walks_pages_and_collects_links() {
        let browser = StaticBrowser::new(paged_site());
        let page = browser.acquire(None).await.expect("acquire");
        page.navigate("https://site.test/list").await.expect("navigate");

        let registry = NodeRegistry::new(Arc::new(PluginRegistry::new()));
        let item = queue_item("https://site.test/list");
        let task = task_for(&item);
        let outputs = HashMap::new();
        let ctx = crate::nodes::NodeCtx {
            browser: page.as_ref(),
            task: &task,
            item: &item,
            outputs: &outputs,
            registry: &registry,
            default_timeout: Duration::from_secs(5),
        };

        let config: crate::model::NodeConfig = serde_json::from_value(serde_json::json!({
            "id": "pages",
            "type": "paginate",
            "params": {
                "selector": ".next",
                "max_pages": 3,
                "link_selector": ".item",
                "marker": "product"
            }
        }))
        .expect("node config");

        let output = PaginateNode.execute(&ctx, &config).await.expect("paginate");
        let urls: Vec<&str> = output
            .discovered_urls
            .iter()
            .map(|d| d.url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://site.test/p/1",
                "https://site.test/p/2",
                "https://site.test/p/3"
            ]
        );
        assert_eq!(output.result.expect("result")["pages_visited"], 3);
    }

    #[tokio::test]
    async fn max_pages_bounds_the_walk() {
        let browser = StaticBrowser::new(paged_site());
        let page = browser.acquire(None).await.expect("acquire");
        page.navigate("https://site.test/list").await.expect("navigate");

        let registry = NodeRegistry::new(Arc::new(PluginRegistry::new()));
        let item = queue_item("https://site.test/list");
        let task = task_for(&item);
        let outputs = HashMap::new();
        let ctx = crate::nodes::NodeCtx {
            browser: page.as_ref(),
            task: &task,
            item: &item,
            outputs: &outputs,
            registry: &registry,
            default_timeout: Duration::from_secs(5),
        };

        let config: crate::model::NodeConfig = serde_json::from_value(serde_json::json!({
            "id": "pages",
            "type": "paginate",
            "params": { "selector": ".next", "max_pages": 2, "link_selector": ".item" }
        }))
        .expect("node config");

        let output = PaginateNode.execute(&ctx, &config).await.expect("paginate");
        assert_eq!(output.discovered_urls.len(), 2);
    }
}
